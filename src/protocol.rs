use strum_macros::{Display, EnumIter};

/// GSP primary control service UUID.
pub const SERVICE_UUID: &str = "34802252-7185-4d5d-b431-630e7050e8f0";
/// Characteristic used for command writes.
pub const WRITE_CHARACTERISTIC_UUID: &str = "34800001-7185-4d5d-b431-630e7050e8f0";
/// Characteristic used for notifications (command responses and data frames).
pub const NOTIFY_CHARACTERISTIC_UUID: &str = "34800002-7185-4d5d-b431-630e7050e8f0";

/// Fixed reference palette used by [`crate::session::Session`]'s high-level operations.
///
/// Operations are serialised on one Session, so a fixed per-opcode reference is safe;
/// a pipelining implementation would need to allocate references from a pool instead.
pub mod reference {
    pub const HELLO: u8 = 100;
    pub const FETCH_LOG: u8 = 101;
    pub const PUT_CONFIG: u8 = 102;
    pub const START: u8 = 103;
    pub const STOP: u8 = 104;
    pub const GET: u8 = 105;
    pub const ERASE: u8 = 106;
    pub const SYSMODE: u8 = 107;
    pub const TIME: u8 = 108;
}

/// One GSP command opcode.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display)]
#[repr(u8)]
pub enum Opcode {
    #[strum(to_string = "HELLO")]
    Hello = 0,
    #[strum(to_string = "SUBSCRIBE")]
    Subscribe = 1,
    #[strum(to_string = "UNSUBSCRIBE")]
    Unsubscribe = 2,
    #[strum(to_string = "FETCH_LOG")]
    FetchLog = 3,
    #[strum(to_string = "GET")]
    Get = 4,
    #[strum(to_string = "CLEAR_LOGBOOK")]
    ClearLogbook = 5,
    #[strum(to_string = "PUT_DATALOGGER_CONFIG")]
    PutDataloggerConfig = 6,
    #[strum(to_string = "PUT_SYSTEMMODE")]
    PutSystemMode = 7,
    #[strum(to_string = "PUT_UTCTIME")]
    PutUtcTime = 8,
    #[strum(to_string = "PUT_DATALOGGER_STATE")]
    PutDataloggerState = 9,
}

impl Opcode {
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Byte written to [`Opcode::PutDataloggerState`] to stop logging.
pub const DATALOGGER_STATE_READY: u8 = 2;
/// Byte written to [`Opcode::PutDataloggerState`] to start logging.
pub const DATALOGGER_STATE_LOGGING: u8 = 3;

/// System mode the device is reset to after a fetch session, regardless of firmware
/// version, to avoid a 409 on a follow-up `FETCH_LOG` on firmware <= 2.3.1.
pub const POST_FETCH_SYSTEM_MODE: u8 = 5;

/// Resource path implicitly appended by `configure` to every caller-supplied path list.
pub const IMPLICIT_CONFIG_PATH: &str = "/Time/Detailed";

/// Resource path queried to determine the current datalogger state.
pub const DATALOGGER_STATE_PATH: &str = "/Mem/DataLogger/State";

/// HTTP-style status code carried by a well-formed `CommandResponse`.
pub const STATUS_OK: u16 = 200;
/// Status carried by a `FETCH_LOG` response once the requested log does not exist.
pub const STATUS_NOT_FOUND: u16 = 404;

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn opcode_values_match_wire_protocol() {
        assert_eq!(0, Opcode::Hello.as_u8());
        assert_eq!(3, Opcode::FetchLog.as_u8());
        assert_eq!(9, Opcode::PutDataloggerState.as_u8());
    }

    #[test]
    fn opcode_display_matches_wire_name() {
        assert_eq!("FETCH_LOG", Opcode::FetchLog.to_string());
        assert_eq!("PUT_DATALOGGER_STATE", Opcode::PutDataloggerState.to_string());
    }
}
