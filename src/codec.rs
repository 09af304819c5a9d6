//! Wire framing for GSP packets: [`Command`] encoding and [`InboundFrame`] decoding.

use thiserror::Error;

use crate::protocol::Opcode;

/// Errors returned while decoding an inbound notification payload.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum FrameDecodeError {
    /// The payload did not contain even the leading response-code and reference bytes.
    #[error("frame is too short: expected at least 2 bytes, got {actual}")]
    TooShort { actual: usize },
    /// A `CommandResponse` frame did not carry the 2-byte status word it was expected to.
    #[error("command response is missing its status word: expected at least 4 bytes, got {actual}")]
    MissingStatusWord { actual: usize },
    /// The leading byte did not match any known response code.
    #[error("unknown response code {value:#04x}")]
    UnknownResponseCode { value: u8 },
}

/// An outbound GSP command: `opcode || reference || payload`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Command {
    pub opcode: Opcode,
    pub reference: u8,
    pub payload: Vec<u8>,
}

impl Command {
    #[must_use]
    pub fn new(opcode: Opcode, reference: u8, payload: Vec<u8>) -> Self {
        Self {
            opcode,
            reference,
            payload,
        }
    }

    /// Builds a `GET`/`SUBSCRIBE`-shaped payload: one NUL-terminated UTF-8 resource path.
    #[must_use]
    pub fn resource_path_payload(path: &str) -> Vec<u8> {
        let mut payload = Vec::with_capacity(path.len() + 1);
        payload.extend_from_slice(path.as_bytes());
        payload.push(0);
        payload
    }

    /// Builds a `PUT_DATALOGGER_CONFIG`-shaped payload: a concatenation of NUL-terminated
    /// UTF-8 paths.
    #[must_use]
    pub fn config_payload<'a>(paths: impl IntoIterator<Item = &'a str>) -> Vec<u8> {
        let mut payload = Vec::new();
        for path in paths {
            payload.extend_from_slice(path.as_bytes());
            payload.push(0);
        }
        payload
    }

    /// Builds a `FETCH_LOG` payload: a little-endian `u32` log id.
    #[must_use]
    pub fn fetch_log_payload(log_id: u32) -> Vec<u8> {
        log_id.to_le_bytes().to_vec()
    }

    /// Builds a `PUT_UTCTIME` payload: little-endian microseconds since the Unix epoch.
    #[must_use]
    pub fn utc_time_payload(microseconds_since_epoch: u64) -> Vec<u8> {
        microseconds_since_epoch.to_le_bytes().to_vec()
    }
}

/// Serialises a [`Command`] to its on-wire byte representation.
#[must_use]
pub fn encode_command(command: &Command) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(2 + command.payload.len());
    bytes.push(command.opcode.as_u8());
    bytes.push(command.reference);
    bytes.extend_from_slice(&command.payload);
    bytes
}

/// One inbound GSP notification, decoded per the leading `response_code` byte.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum InboundFrame {
    /// A response to a previously issued command.
    ///
    /// `status_code` is `None` only for the HELLO opcode's response, whose peer omits
    /// the status word and reports success implicitly.
    CommandResponse {
        reference: u8,
        status_code: Option<u16>,
        data: Vec<u8>,
    },
    /// A streamed data frame (`response_code == 2`).
    DataFrame { reference: u8, payload: Vec<u8> },
    /// A streamed data frame, second-part variant (`response_code == 3`). Treated
    /// identically to [`InboundFrame::DataFrame`] at this layer.
    DataFramePart2 { reference: u8, payload: Vec<u8> },
}

impl InboundFrame {
    #[must_use]
    pub fn reference(&self) -> u8 {
        match self {
            Self::CommandResponse { reference, .. }
            | Self::DataFrame { reference, .. }
            | Self::DataFramePart2 { reference, .. } => *reference,
        }
    }
}

/// Decodes a raw notification payload into a typed [`InboundFrame`].
///
/// `is_hello_reference` tells the codec whether `reference` is the reference under
/// which a HELLO command was issued — the peer omits the status word only for that
/// one response, and the codec must not generalise the rule to other opcodes.
pub fn decode_frame(
    bytes: &[u8],
    is_hello_reference: impl FnOnce(u8) -> bool,
) -> Result<InboundFrame, FrameDecodeError> {
    if bytes.len() < 2 {
        return Err(FrameDecodeError::TooShort { actual: bytes.len() });
    }

    let response_code = bytes[0];
    let reference = bytes[1];
    let rest = &bytes[2..];

    match response_code {
        1 => {
            if is_hello_reference(reference) {
                return Ok(InboundFrame::CommandResponse {
                    reference,
                    status_code: None,
                    data: rest.to_vec(),
                });
            }
            if rest.len() < 2 {
                return Err(FrameDecodeError::MissingStatusWord { actual: bytes.len() });
            }
            let status_code = u16::from_le_bytes([rest[0], rest[1]]);
            let data = rest[2..].to_vec();
            Ok(InboundFrame::CommandResponse {
                reference,
                status_code: Some(status_code),
                data,
            })
        }
        2 => Ok(InboundFrame::DataFrame {
            reference,
            payload: rest.to_vec(),
        }),
        3 => Ok(InboundFrame::DataFramePart2 {
            reference,
            payload: rest.to_vec(),
        }),
        other => Err(FrameDecodeError::UnknownResponseCode { value: other }),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn encode_command_concatenates_header_and_payload() {
        let command = Command::new(Opcode::Get, 0x65, b"/Mem/DataLogger/State\0".to_vec());
        let encoded = encode_command(&command);

        assert_eq!(0x04, encoded[0]);
        assert_eq!(0x65, encoded[1]);
        assert_eq!(b"/Mem/DataLogger/State\0", &encoded[2..]);
    }

    #[test]
    fn encode_then_decode_round_trips_opcode_reference_and_payload() {
        let command = Command::new(Opcode::PutSystemMode, 107, vec![5]);
        let encoded = encode_command(&command);

        assert_eq!(Opcode::PutSystemMode.as_u8(), encoded[0]);
        assert_eq!(command.reference, encoded[1]);
        assert_eq!(command.payload, encoded[2..].to_vec());
    }

    #[test]
    fn decode_command_response_parses_status_and_data() {
        let bytes = [0x01, 0x65, 0xC8, 0x00, 0x02];
        let decoded = decode_frame(&bytes, |_| false).expect("well-formed response decodes");

        assert_eq!(
            InboundFrame::CommandResponse {
                reference: 0x65,
                status_code: Some(200),
                data: vec![0x02],
            },
            decoded
        );
    }

    #[test]
    fn decode_hello_response_has_no_status_word() {
        let mut bytes = vec![0x01, 0x64, 0x01];
        bytes.extend_from_slice(b"241330000455\0TestSensor\0");
        let decoded =
            decode_frame(&bytes, |reference| reference == 0x64).expect("HELLO response decodes");

        let InboundFrame::CommandResponse {
            status_code, data, ..
        } = decoded
        else {
            panic!("expected CommandResponse");
        };
        assert_eq!(None, status_code);
        assert_eq!(0x01, data[0]);
    }

    #[test]
    fn decode_hello_response_with_only_protocol_version_byte_does_not_panic() {
        let bytes = [0x01, 0x64, 0x01];
        let decoded =
            decode_frame(&bytes, |reference| reference == 0x64).expect("short HELLO response decodes");

        let InboundFrame::CommandResponse { data, .. } = decoded else {
            panic!("expected CommandResponse");
        };
        assert_eq!(vec![0x01], data);
    }

    #[rstest]
    #[case(&[0x02, 0x65, 0x00, 0x00, 0x00, 0x00, b't', b'e'], InboundFrame::DataFrame { reference: 0x65, payload: vec![0x00, 0x00, 0x00, 0x00, b't', b'e'] })]
    #[case(&[0x03, 0x65, 0x09, 0x00, 0x00, 0x00], InboundFrame::DataFramePart2 { reference: 0x65, payload: vec![0x09, 0x00, 0x00, 0x00] })]
    fn decode_data_frames(#[case] bytes: &[u8], #[case] expected: InboundFrame) {
        let decoded = decode_frame(bytes, |_| false).expect("data frame decodes");
        assert_eq!(expected, decoded);
    }

    #[test]
    fn decode_rejects_truncated_frame() {
        let decoded = decode_frame(&[0x01], |_| false);
        assert_eq!(Err(FrameDecodeError::TooShort { actual: 1 }), decoded);
    }

    #[test]
    fn decode_rejects_command_response_missing_status_word() {
        let decoded = decode_frame(&[0x01, 0x65, 0x00], |_| false);
        assert_eq!(
            Err(FrameDecodeError::MissingStatusWord { actual: 3 }),
            decoded
        );
    }

    #[test]
    fn decode_rejects_unknown_response_code() {
        let decoded = decode_frame(&[0x07, 0x01], |_| false);
        assert_eq!(Err(FrameDecodeError::UnknownResponseCode { value: 0x07 }), decoded);
    }

    #[test]
    fn config_payload_concatenates_nul_terminated_paths() {
        let payload = Command::config_payload(["/Meas/ECG/200/mV", "/Time/Detailed"]);
        assert_eq!(b"/Meas/ECG/200/mV\0/Time/Detailed\0".to_vec(), payload);
    }

    #[test]
    fn fetch_log_payload_is_little_endian_u32() {
        assert_eq!(vec![1, 0, 0, 0], Command::fetch_log_payload(1));
        assert_eq!(vec![2, 0, 0, 0], Command::fetch_log_payload(2));
    }
}
