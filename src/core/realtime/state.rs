//! Conversation phase tracking.
//!
//! The phase is a pure function of the events the engine observes. It is
//! used for logging and for deciding whether an interrupt has anything to
//! stop; audio gating itself is driven by the session flags.

use std::fmt;
use thiserror::Error;

/// Where the conversation currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Connecting,
    /// Socket open, waiting for `session.updated`
    Configuring,
    Listening,
    UserSpeaking,
    /// User turn closed, no response yet
    ServerProcessing,
    AiResponding,
    /// Cancel sent, waiting for confirmation
    Interrupting,
    Closed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Connecting => "connecting",
            SessionPhase::Configuring => "configuring",
            SessionPhase::Listening => "listening",
            SessionPhase::UserSpeaking => "user_speaking",
            SessionPhase::ServerProcessing => "server_processing",
            SessionPhase::AiResponding => "ai_responding",
            SessionPhase::Interrupting => "interrupting",
            SessionPhase::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Inputs to the phase machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    Handshake,
    ConfigAcknowledged,
    SpeechStarted,
    SpeechStopped,
    ResponseCreated,
    ResponseDone,
    InterruptIssued,
    CancelConfirmed,
    /// User turn produced nothing worth answering
    TurnAbandoned,
    Disconnected,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("no transition from {from} on {event:?}")]
pub struct InvalidTransition {
    pub from: SessionPhase,
    pub event: PhaseEvent,
}

impl SessionPhase {
    /// Compute the phase after `event`.
    ///
    /// Events that are harmless in the current phase (a late
    /// `ResponseDone`, a repeated `ConfigAcknowledged`) leave the phase
    /// unchanged; only genuinely impossible combinations are errors.
    pub fn apply(self, event: PhaseEvent) -> Result<SessionPhase, InvalidTransition> {
        use PhaseEvent as E;
        use SessionPhase as P;

        let next = match (self, event) {
            (P::Closed, _) => P::Closed,
            (_, E::Disconnected) => P::Closed,

            (P::Connecting, E::Handshake) => P::Configuring,
            (P::Configuring, E::ConfigAcknowledged) => P::Listening,
            (p, E::ConfigAcknowledged) if p != P::Connecting => p,

            (
                P::Listening | P::ServerProcessing | P::AiResponding | P::Interrupting | P::UserSpeaking,
                E::SpeechStarted,
            ) => P::UserSpeaking,

            (P::UserSpeaking, E::SpeechStopped) => P::ServerProcessing,
            (p @ (P::Listening | P::ServerProcessing | P::AiResponding | P::Interrupting), E::SpeechStopped) => p,

            (
                P::Listening | P::ServerProcessing | P::UserSpeaking | P::AiResponding | P::Interrupting,
                E::ResponseCreated,
            ) => P::AiResponding,

            (P::AiResponding, E::ResponseDone) => P::Listening,
            (p @ (P::Listening | P::UserSpeaking | P::ServerProcessing | P::Interrupting), E::ResponseDone) => p,

            (P::AiResponding | P::Interrupting, E::InterruptIssued) => P::Interrupting,

            (P::Interrupting, E::CancelConfirmed) => P::Listening,
            (p @ (P::Listening | P::UserSpeaking | P::ServerProcessing | P::AiResponding), E::CancelConfirmed) => p,

            (P::UserSpeaking | P::ServerProcessing, E::TurnAbandoned) => P::Listening,
            (P::Listening, E::TurnAbandoned) => P::Listening,

            (from, event) => return Err(InvalidTransition { from, event }),
        };
        Ok(next)
    }
}
