//! Status and alarm code taxonomy.
//!
//! Every rejected line maps to exactly one [`Status`]; the numeric
//! discriminants are the wire format (`error:N`) and must stay stable.
//! Runtime faults latch as [`Alarm`] codes instead.

use thiserror::Error;

/// Synchronous per-line result codes.
///
/// Parser failures leave all state untouched; the code is the only
/// side effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[repr(u8)]
pub enum Status {
    /// Letter expected at the start of a g-code word.
    #[error("expected command letter")]
    ExpectedCommandLetter = 1,
    /// Letter not followed by a parsable float.
    #[error("bad number format")]
    BadNumberFormat = 2,
    /// `$` system line outside the supported set.
    #[error("invalid statement")]
    InvalidStatement = 3,
    /// Negative value for a word that must be positive.
    #[error("negative value")]
    NegativeValue = 4,
    /// Persisted parameter read failed or was corrupt.
    #[error("setting read failed")]
    SettingReadFail = 7,
    /// Command requires Idle and the machine is not.
    #[error("not idle")]
    IdleError = 8,
    /// G-code locked out by an alarm or sleep state.
    #[error("g-code lock")]
    SystemGcLock = 9,
    /// Line exceeded the RX buffer.
    #[error("line overflow")]
    Overflow = 11,
    /// Jog target violates a soft travel limit.
    #[error("travel exceeded")]
    TravelExceeded = 15,
    /// Jog block carried commands outside the jog-legal set.
    #[error("invalid jog command")]
    InvalidJogCommand = 16,
    /// G or M code outside the supported dialect.
    #[error("unsupported command")]
    UnsupportedCommand = 20,
    /// Two commands from one modal group in a single block.
    #[error("modal group violation")]
    ModalGroupViolation = 21,
    /// Motion requires a feed rate that was never defined.
    #[error("undefined feed rate")]
    UndefinedFeedRate = 22,
    /// Gxx.x mantissa on a command that must be an integer.
    #[error("command value not integer")]
    CommandValueNotInteger = 23,
    /// Axis-word-using non-modal combined with a motion mode.
    #[error("axis command conflict")]
    AxisCommandConflict = 24,
    /// Same value word appeared twice.
    #[error("word repeated")]
    WordRepeated = 25,
    /// Command needs axis words and none were given.
    #[error("no axis words")]
    NoAxisWords = 26,
    /// N value above the supported ceiling.
    #[error("invalid line number")]
    InvalidLineNumber = 27,
    /// A required value word (P, L, ...) is missing.
    #[error("value word missing")]
    ValueWordMissing = 28,
    /// Coordinate system index beyond G59.
    #[error("unsupported coordinate system")]
    UnsupportedCoordSys = 29,
    /// G53 with a motion mode other than G0/G1.
    #[error("G53 invalid motion mode")]
    G53InvalidMotionMode = 30,
    /// Axis words present while G80 is active.
    #[error("axis words exist")]
    AxisWordsExist = 31,
    /// Arc block lacks axis words in the active plane.
    #[error("no axis words in plane")]
    NoAxisWordsInPlane = 32,
    /// Target unreachable: arc endpoint/radius mismatch or zero-length
    /// radius arc.
    #[error("invalid target")]
    InvalidTarget = 33,
    /// Radius-mode geometry has no solution.
    #[error("arc radius error")]
    ArcRadiusError = 34,
    /// Arc block lacks I/J/K offsets in the active plane.
    #[error("no offsets in plane")]
    NoOffsetsInPlane = 35,
    /// Leftover value words unused by any command in the block.
    #[error("unused words")]
    UnusedWords = 36,
}

impl Status {
    /// Wire-format numeric code.
    #[inline]
    pub const fn code(&self) -> u8 {
        *self as u8
    }
}

/// Latched asynchronous fault codes.
///
/// An alarm force-stops the steppers, flushes the planner, and locks
/// out g-code until cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[repr(u8)]
pub enum Alarm {
    /// Hard limit switch tripped mid-motion. Position lost.
    #[error("hard limit")]
    HardLimit = 1,
    /// Motion target exceeded machine travel. Position retained.
    #[error("soft limit")]
    SoftLimit = 2,
    /// Reset issued while motion was in progress. Position lost.
    #[error("abort during cycle")]
    AbortCycle = 3,
    /// Probe not in expected initial state.
    #[error("probe fail initial")]
    ProbeFailInitial = 4,
    /// Probe never contacted within travel.
    #[error("probe fail contact")]
    ProbeFailContact = 5,
}

impl Alarm {
    /// Wire-format numeric code.
    #[inline]
    pub const fn code(&self) -> u8 {
        *self as u8
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_stable() {
        assert_eq!(Status::ExpectedCommandLetter.code(), 1);
        assert_eq!(Status::BadNumberFormat.code(), 2);
        assert_eq!(Status::InvalidStatement.code(), 3);
        assert_eq!(Status::NegativeValue.code(), 4);
        assert_eq!(Status::IdleError.code(), 8);
        assert_eq!(Status::SystemGcLock.code(), 9);
        assert_eq!(Status::Overflow.code(), 11);
        assert_eq!(Status::InvalidJogCommand.code(), 16);
        assert_eq!(Status::UnsupportedCommand.code(), 20);
        assert_eq!(Status::ModalGroupViolation.code(), 21);
        assert_eq!(Status::UndefinedFeedRate.code(), 22);
        assert_eq!(Status::InvalidTarget.code(), 33);
        assert_eq!(Status::ArcRadiusError.code(), 34);
        assert_eq!(Status::UnusedWords.code(), 36);
    }

    #[test]
    fn status_is_std_error() {
        let err: &dyn std::error::Error = &Status::UnsupportedCommand;
        assert_eq!(err.to_string(), "unsupported command");
    }

    #[test]
    fn alarm_codes() {
        assert_eq!(Alarm::HardLimit.code(), 1);
        assert_eq!(Alarm::SoftLimit.code(), 2);
        assert_eq!(Alarm::AbortCycle.code(), 3);
    }
}
