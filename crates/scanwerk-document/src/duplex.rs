// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Manual duplex detection.
//
// A user with a simplex flatbed scans the fronts, turns the stack over and
// scans the backs as a second session. The coordinator decides whether a
// finished session is held as a recto, paired with the previous one, or
// released on its own. It performs no I/O: `step` maps (state, event) to
// (state, effects) and the dispatcher carries the effects out.

use std::fmt;

use scanwerk_core::types::SessionId;
use tracing::debug;

/// What the coordinator needs to know about a finished session.
pub trait DuplexCandidate {
    fn session_id(&self) -> SessionId;
    /// A finished, successful, PDF-kind session of a duplex-enabled destination.
    fn duplex_eligible(&self) -> bool;
    fn page_count(&self) -> usize;
    /// Same destination and output kind.
    fn pairs_with(&self, other: &Self) -> bool;
}

/// Inputs, serialised through the dispatch loop.
#[derive(Debug)]
pub enum DuplexEvent<S> {
    SessionStarted(SessionId),
    /// A page arrived for this session.
    SessionActivity(SessionId),
    SessionEnded(S),
    TimerFired,
}

/// Something to assemble.
#[derive(Debug, PartialEq)]
pub enum Assembly<S> {
    Simplex(S),
    Duplex { recto: S, verso: S },
}

/// Side effects requested from the caller, in order.
#[derive(Debug, PartialEq)]
pub enum DuplexEffect<S> {
    Assemble(Assembly<S>),
    /// Stop a session that is still scanning; it will come back as
    /// `SessionEnded`.
    CloseSession(SessionId),
    ResetTimer,
    StopTimer,
}

/// Observable phase, without payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplexPhase {
    Idling,
    IdlingExpectingDuplex,
    ProcessingSimplex,
    ProcessingDuplex,
}

impl fmt::Display for DuplexPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A side of a pair: either still scanning or finished.
#[derive(Debug)]
enum Slot<S> {
    Open(SessionId),
    Closed(S),
}

impl<S: DuplexCandidate> Slot<S> {
    fn is_open(&self, id: SessionId) -> bool {
        matches!(self, Slot::Open(open) if *open == id)
    }
}

#[derive(Debug)]
enum State<S> {
    Idling,
    IdlingExpectingDuplex { recto: S },
    ProcessingSimplex { recto: SessionId },
    ProcessingDuplex { recto: Slot<S>, verso: SessionId },
}

/// An assembly decided while one of its sessions was still open.
#[derive(Debug)]
enum Pending<S> {
    Simplex(Slot<S>),
    Duplex(Slot<S>, Slot<S>),
}

/// The cross-session state machine.
#[derive(Debug)]
pub struct DuplexCoordinator<S> {
    state: State<S>,
    /// Decisions waiting for a session to finish closing.
    flushing: Vec<Pending<S>>,
}

impl<S> Default for DuplexCoordinator<S> {
    fn default() -> Self {
        Self {
            state: State::Idling,
            flushing: Vec::new(),
        }
    }
}

impl<S: DuplexCandidate> DuplexCoordinator<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> DuplexPhase {
        match self.state {
            State::Idling => DuplexPhase::Idling,
            State::IdlingExpectingDuplex { .. } => DuplexPhase::IdlingExpectingDuplex,
            State::ProcessingSimplex { .. } => DuplexPhase::ProcessingSimplex,
            State::ProcessingDuplex { .. } => DuplexPhase::ProcessingDuplex,
        }
    }

    /// Whether a finished session is being held for its verso.
    pub fn holds_pending(&self) -> bool {
        matches!(
            self.state,
            State::IdlingExpectingDuplex { .. }
                | State::ProcessingDuplex {
                    recto: Slot::Closed(_),
                    ..
                }
        )
    }

    /// Apply one event in place.
    pub fn handle(&mut self, event: DuplexEvent<S>) -> Vec<DuplexEffect<S>> {
        let current = std::mem::take(self);
        let (next, effects) = current.step(event);
        *self = next;
        effects
    }

    /// The transition function.
    pub fn step(mut self, event: DuplexEvent<S>) -> (Self, Vec<DuplexEffect<S>>) {
        let mut fx = Vec::new();
        let before = self.phase();

        let state = match (self.state, event) {
            // -- A session starts --
            (State::Idling, DuplexEvent::SessionStarted(id)) => {
                fx.push(DuplexEffect::ResetTimer);
                State::ProcessingSimplex { recto: id }
            }
            (State::IdlingExpectingDuplex { recto }, DuplexEvent::SessionStarted(id)) => {
                fx.push(DuplexEffect::ResetTimer);
                State::ProcessingDuplex {
                    recto: Slot::Closed(recto),
                    verso: id,
                }
            }
            (State::ProcessingSimplex { recto }, DuplexEvent::SessionStarted(id)) => {
                fx.push(DuplexEffect::ResetTimer);
                State::ProcessingDuplex {
                    recto: Slot::Open(recto),
                    verso: id,
                }
            }
            (State::ProcessingDuplex { recto, verso }, DuplexEvent::SessionStarted(id)) => {
                // A third session: finish the pair with what it has.
                push_pending(
                    &mut self.flushing,
                    Pending::Duplex(recto, Slot::Open(verso)),
                    &mut fx,
                );
                fx.push(DuplexEffect::ResetTimer);
                State::ProcessingSimplex { recto: id }
            }

            // -- Progress keeps the window open --
            (State::Idling, DuplexEvent::SessionActivity(_)) => {
                fx.push(DuplexEffect::StopTimer);
                State::Idling
            }
            (state, DuplexEvent::SessionActivity(_)) => {
                fx.push(DuplexEffect::ResetTimer);
                state
            }

            // -- A session finished --
            (state, DuplexEvent::SessionEnded(session))
                if is_flushing(&self.flushing, session.session_id()) =>
            {
                fill_pending(&mut self.flushing, session, &mut fx);
                state
            }
            (State::ProcessingSimplex { recto }, DuplexEvent::SessionEnded(session))
                if session.session_id() == recto =>
            {
                if session.duplex_eligible() {
                    fx.push(DuplexEffect::ResetTimer);
                    State::IdlingExpectingDuplex { recto: session }
                } else {
                    fx.push(DuplexEffect::Assemble(Assembly::Simplex(session)));
                    fx.push(DuplexEffect::StopTimer);
                    State::Idling
                }
            }
            (State::ProcessingDuplex { recto, verso }, DuplexEvent::SessionEnded(session)) => {
                let id = session.session_id();
                if recto.is_open(id) {
                    State::ProcessingDuplex {
                        recto: Slot::Closed(session),
                        verso,
                    }
                } else if id == verso {
                    push_pending(
                        &mut self.flushing,
                        Pending::Duplex(recto, Slot::Closed(session)),
                        &mut fx,
                    );
                    fx.push(DuplexEffect::StopTimer);
                    State::Idling
                } else {
                    fx.push(DuplexEffect::Assemble(Assembly::Simplex(session)));
                    State::ProcessingDuplex { recto, verso }
                }
            }
            (state, DuplexEvent::SessionEnded(session)) => {
                // Not tracked (e.g. ended after a timeout released its
                // state): never drop pages, save it on its own.
                debug!(session = %session.session_id(), "untracked session ended");
                fx.push(DuplexEffect::Assemble(Assembly::Simplex(session)));
                state
            }

            // -- The wait window elapsed --
            (State::Idling, DuplexEvent::TimerFired) => {
                fx.push(DuplexEffect::StopTimer);
                State::Idling
            }
            (State::IdlingExpectingDuplex { recto }, DuplexEvent::TimerFired) => {
                fx.push(DuplexEffect::Assemble(Assembly::Simplex(recto)));
                fx.push(DuplexEffect::StopTimer);
                State::Idling
            }
            (State::ProcessingSimplex { recto }, DuplexEvent::TimerFired) => {
                push_pending(
                    &mut self.flushing,
                    Pending::Simplex(Slot::Open(recto)),
                    &mut fx,
                );
                fx.push(DuplexEffect::StopTimer);
                State::Idling
            }
            (State::ProcessingDuplex { recto, verso }, DuplexEvent::TimerFired) => {
                push_pending(
                    &mut self.flushing,
                    Pending::Duplex(recto, Slot::Open(verso)),
                    &mut fx,
                );
                fx.push(DuplexEffect::StopTimer);
                State::Idling
            }
        };

        self.state = state;
        let after = self.phase();
        if before != after {
            debug!(%before, %after, "duplex state change");
        }
        (self, fx)
    }
}

/// Decide how a recto and verso are assembled. Mismatches fall back to two
/// standalone documents.
pub fn pair<S: DuplexCandidate>(recto: S, verso: S) -> Vec<Assembly<S>> {
    let compatible = recto.duplex_eligible()
        && verso.duplex_eligible()
        && recto.pairs_with(&verso)
        && recto.page_count() == verso.page_count();
    if compatible {
        vec![Assembly::Duplex { recto, verso }]
    } else {
        debug!(
            recto_pages = recto.page_count(),
            verso_pages = verso.page_count(),
            "sessions do not pair, saving separately"
        );
        vec![Assembly::Simplex(recto), Assembly::Simplex(verso)]
    }
}

/// Duplex page order: recto in capture order, verso reversed, alternating.
pub fn interleave<T: Clone>(recto: &[T], verso: &[T]) -> Vec<T> {
    let mut out = Vec::with_capacity(recto.len() + verso.len());
    let mut backs = verso.iter().rev();
    for front in recto {
        out.push(front.clone());
        if let Some(back) = backs.next() {
            out.push(back.clone());
        }
    }
    out.extend(backs.cloned());
    out
}

fn is_flushing<S: DuplexCandidate>(flushing: &[Pending<S>], id: SessionId) -> bool {
    flushing.iter().any(|pending| match pending {
        Pending::Simplex(slot) => slot.is_open(id),
        Pending::Duplex(a, b) => a.is_open(id) || b.is_open(id),
    })
}

/// Record a decision; close whatever is still open and assemble once
/// nothing is.
fn push_pending<S: DuplexCandidate>(
    flushing: &mut Vec<Pending<S>>,
    pending: Pending<S>,
    fx: &mut Vec<DuplexEffect<S>>,
) {
    let open: Vec<SessionId> = match &pending {
        Pending::Simplex(slot) => open_id(slot).into_iter().collect(),
        Pending::Duplex(a, b) => open_id(a).into_iter().chain(open_id(b)).collect(),
    };
    if open.is_empty() {
        release(pending, fx);
    } else {
        fx.extend(open.into_iter().map(DuplexEffect::CloseSession));
        flushing.push(pending);
    }
}

fn fill_pending<S: DuplexCandidate>(
    flushing: &mut Vec<Pending<S>>,
    session: S,
    fx: &mut Vec<DuplexEffect<S>>,
) {
    let id = session.session_id();
    let Some(pos) = flushing.iter().position(|pending| match pending {
        Pending::Simplex(slot) => slot.is_open(id),
        Pending::Duplex(a, b) => a.is_open(id) || b.is_open(id),
    }) else {
        return;
    };

    let pending = flushing.remove(pos);
    let filled = match pending {
        Pending::Simplex(_) => Pending::Simplex(Slot::Closed(session)),
        Pending::Duplex(a, b) if a.is_open(id) => Pending::Duplex(Slot::Closed(session), b),
        Pending::Duplex(a, _) => Pending::Duplex(a, Slot::Closed(session)),
    };
    push_pending(flushing, filled, fx);
}

fn open_id<S>(slot: &Slot<S>) -> Option<SessionId> {
    match slot {
        Slot::Open(id) => Some(*id),
        Slot::Closed(_) => None,
    }
}

fn release<S: DuplexCandidate>(pending: Pending<S>, fx: &mut Vec<DuplexEffect<S>>) {
    match pending {
        Pending::Simplex(Slot::Closed(session)) => {
            fx.push(DuplexEffect::Assemble(Assembly::Simplex(session)));
        }
        Pending::Duplex(Slot::Closed(recto), Slot::Closed(verso)) => {
            fx.extend(pair(recto, verso).into_iter().map(DuplexEffect::Assemble));
        }
        // Callers only release fully closed decisions.
        _ => {}
    }
}
