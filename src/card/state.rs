#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CardVersion {
    Unknown,
    V1,
    V2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapacityMode {
    // byte addressed
    StandardCapacity,
    HighCapacity,
}

// No high-capacity V1 cards exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadyMode {
    HighCapacityV2,
    StandardCapacityV2,
    StandardCapacityV1,
}

impl ReadyMode {
    pub const fn version(self) -> CardVersion {
        match self {
            Self::HighCapacityV2 | Self::StandardCapacityV2 => CardVersion::V2,
            Self::StandardCapacityV1 => CardVersion::V1,
        }
    }

    pub const fn capacity(self) -> CapacityMode {
        match self {
            Self::HighCapacityV2 => CapacityMode::HighCapacity,
            Self::StandardCapacityV2 | Self::StandardCapacityV1 => CapacityMode::StandardCapacity,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CardFailure {
    Cmd0Fail,
    Cmd8Fail,
    VoltageSetFail,
    VoltageRangeFail,
    CheckPatternFail,
    Cmd16Fail,
    Cmd58Fail,
    Acmd41Fail,
    Acmd42Fail,
    ReadFailTimeout,
    ReadFailStart,
    ReadFailCrc,
    WriteFailCommand,
    WriteFailData,
    WriteBusyTimeout,
    StatusFail,
    CsdFail,
    UnknownFail,
}

impl CardFailure {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Cmd0Fail => "cmd0 failed: card never entered idle",
            Self::Cmd8Fail => "cmd8 failed: unexpected response",
            Self::VoltageSetFail => "cmd8 failed: voltage not echoed",
            Self::VoltageRangeFail => "ocr rejected: 3.3v range missing",
            Self::CheckPatternFail => "cmd8 failed: check pattern mismatch",
            Self::Cmd16Fail => "cmd16 failed: block length rejected",
            Self::Cmd58Fail => "cmd58 failed: card not powered up",
            Self::Acmd41Fail => "acmd41 failed: card stayed idle",
            Self::Acmd42Fail => "acmd42 failed: pull-up not changed",
            Self::ReadFailTimeout => "read failed: no command response",
            Self::ReadFailStart => "read failed: no start token",
            Self::ReadFailCrc => "read failed: data crc rejected",
            Self::WriteFailCommand => "write failed: command rejected",
            Self::WriteFailData => "write failed: data rejected",
            Self::WriteBusyTimeout => "write failed: card stayed busy",
            Self::StatusFail => "status failed: card reported error",
            Self::CsdFail => "csd read failed",
            Self::UnknownFail => "unknown failure",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CardState {
    NotReady,
    Initializing(CardVersion),
    Ready(ReadyMode),
    Failed(CardFailure),
}

impl CardState {
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub const fn ready_mode(self) -> Option<ReadyMode> {
        match self {
            Self::Ready(mode) => Some(mode),
            _ => None,
        }
    }

    pub const fn failure(self) -> Option<CardFailure> {
        match self {
            Self::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::NotReady => "not ready",
            Self::Initializing(CardVersion::Unknown) => "initializing",
            Self::Initializing(CardVersion::V1) => "initializing v1",
            Self::Initializing(CardVersion::V2) => "initializing v2",
            Self::Ready(ReadyMode::HighCapacityV2) => "ready: high capacity v2",
            Self::Ready(ReadyMode::StandardCapacityV2) => "ready: standard capacity v2",
            Self::Ready(ReadyMode::StandardCapacityV1) => "ready: standard capacity v1",
            Self::Failed(reason) => reason.label(),
        }
    }
}
