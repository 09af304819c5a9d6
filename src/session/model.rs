//! Data types composed by [`super::Session`]'s high-level operations.

use serde::Serialize;

/// The datalogger's logging state, queried as a GET resource.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[repr(u8)]
pub enum DataLoggerState {
    Unknown = 1,
    Ready = 2,
    Logging = 3,
}

impl TryFrom<u8> for DataLoggerState {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Unknown),
            2 => Ok(Self::Ready),
            3 => Ok(Self::Logging),
            other => Err(other),
        }
    }
}

/// The composed result of [`super::Session::get_status`]: HELLO plus the datalogger
/// state resource.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub protocol_version: u8,
    pub serial_number: String,
    pub product_name: String,
    pub dfu_mac: String,
    pub app_name: String,
    pub app_version: String,
    /// Absent when the follow-up GET for the datalogger state failed; see
    /// [`super::Session::get_status`].
    pub dl_state: Option<DataLoggerState>,
}

/// Parses a HELLO response body: `protocol_version` followed by five NUL-terminated
/// UTF-8 strings. Missing trailing strings default to empty, matching the boundary
/// behaviour that a HELLO response with only the protocol_version byte must not panic.
pub(super) fn parse_hello_body(data: &[u8]) -> DeviceStatus {
    let protocol_version = data.first().copied().unwrap_or_default();
    let mut fields = data.get(1..).unwrap_or_default().split(|&byte| byte == 0);
    let mut next_field = || {
        fields
            .next()
            .map(|segment| String::from_utf8_lossy(segment).into_owned())
            .unwrap_or_default()
    };

    DeviceStatus {
        protocol_version,
        serial_number: next_field(),
        product_name: next_field(),
        dfu_mac: next_field(),
        app_name: next_field(),
        app_version: next_field(),
        dl_state: None,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_full_hello_body() {
        let mut body = vec![1u8];
        for field in ["241330000455", "TestSensor", "AA:BB:CC:DD:EE:FF", "gatt_sensordata_app", "1.0.0"] {
            body.extend_from_slice(field.as_bytes());
            body.push(0);
        }

        let status = parse_hello_body(&body);
        assert_eq!(1, status.protocol_version);
        assert_eq!("241330000455", status.serial_number);
        assert_eq!("TestSensor", status.product_name);
        assert_eq!("1.0.0", status.app_version);
    }

    #[test]
    fn hello_body_with_only_protocol_version_does_not_panic() {
        let status = parse_hello_body(&[1]);
        assert_eq!(1, status.protocol_version);
        assert_eq!("", status.serial_number);
        assert_eq!("", status.app_version);
    }

    #[test]
    fn data_logger_state_rejects_unknown_byte() {
        assert_eq!(Err(9), DataLoggerState::try_from(9));
    }
}
