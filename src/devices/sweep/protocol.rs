//! ASCII command protocol of the serial scanner.
//!
//! Commands are two-letter mnemonics, optionally followed by a two-digit
//! parameter, terminated by LF. Responses have a fixed length per command.
//! Responses that carry a status end in `status(2) checksum(1) LF`, where
//! `checksum = ((s0 + s1) & 0x3F) + 0x30`.

use crate::error::{Error, Result};

/// Command terminator
pub const TERMINATOR: u8 = b'\n';

/// Motor speed setting, Hz (0 stops the motor)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MotorSpeed(u8);

impl MotorSpeed {
    pub const MAX_HZ: u8 = 10;

    pub fn new(hz: u8) -> Result<Self> {
        if hz > Self::MAX_HZ {
            return Err(Error::InvalidParameter(format!(
                "motor speed {} Hz outside 0..={}",
                hz,
                Self::MAX_HZ
            )));
        }
        Ok(Self(hz))
    }

    pub fn hz(self) -> u8 {
        self.0
    }
}

/// Sample rate setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleRate {
    Hz500,
    Hz750,
    Hz1000,
}

impl SampleRate {
    /// Wire code 1..=3
    pub fn code(self) -> u8 {
        match self {
            SampleRate::Hz500 => 1,
            SampleRate::Hz750 => 2,
            SampleRate::Hz1000 => 3,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(SampleRate::Hz500),
            2 => Some(SampleRate::Hz750),
            3 => Some(SampleRate::Hz1000),
            _ => None,
        }
    }

    pub fn hz(self) -> u32 {
        match self {
            SampleRate::Hz500 => 500,
            SampleRate::Hz750 => 750,
            SampleRate::Hz1000 => 1000,
        }
    }

    /// Rate from the 4-digit Hz field of the `ID` response
    pub fn from_hz(hz: u32) -> Option<Self> {
        match hz {
            500 => Some(SampleRate::Hz500),
            750 => Some(SampleRate::Hz750),
            1000 => Some(SampleRate::Hz1000),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `DS` start data acquisition
    StartAcquisition,
    /// `DX` stop data acquisition
    StopAcquisition,
    /// `MZ` motor ready query
    MotorReady,
    /// `MI` motor speed query
    MotorInfo,
    /// `MSnn` set motor speed
    SetMotorSpeed(MotorSpeed),
    /// `LI` sample rate query
    SampleRateInfo,
    /// `LRnn` set sample rate
    SetSampleRate(SampleRate),
    /// `ID` device information
    DeviceInfo,
    /// `IV` version information
    VersionInfo,
    /// `RR` reset, no response
    Reset,
}

impl Command {
    pub fn mnemonic(self) -> &'static [u8; 2] {
        match self {
            Command::StartAcquisition => b"DS",
            Command::StopAcquisition => b"DX",
            Command::MotorReady => b"MZ",
            Command::MotorInfo => b"MI",
            Command::SetMotorSpeed(_) => b"MS",
            Command::SampleRateInfo => b"LI",
            Command::SetSampleRate(_) => b"LR",
            Command::DeviceInfo => b"ID",
            Command::VersionInfo => b"IV",
            Command::Reset => b"RR",
        }
    }

    fn parameter(self) -> Option<u8> {
        match self {
            Command::SetMotorSpeed(speed) => Some(speed.hz()),
            Command::SetSampleRate(rate) => Some(rate.code()),
            _ => None,
        }
    }

    /// Bytes to write
    pub fn encode(self) -> Vec<u8> {
        let mut out = self.mnemonic().to_vec();
        if let Some(p) = self.parameter() {
            out.extend_from_slice(format!("{:02}", p).as_bytes());
        }
        out.push(TERMINATOR);
        out
    }

    /// Fixed length of the device's answer (0 = none)
    pub fn response_len(self) -> usize {
        match self {
            Command::DeviceInfo => 18,
            Command::VersionInfo => 21,
            Command::SetMotorSpeed(_) | Command::SetSampleRate(_) => 9,
            Command::StartAcquisition | Command::StopAcquisition => 6,
            Command::MotorReady | Command::MotorInfo | Command::SampleRateInfo => 5,
            Command::Reset => 0,
        }
    }
}

/// Device state reported by `ID`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfoResponse {
    pub bit_rate: u32,
    pub laser_state: u8,
    pub mode: u8,
    pub diagnostic: u8,
    pub motor_speed: Option<MotorSpeed>,
    pub sample_rate: Option<SampleRate>,
}

/// Versions reported by `IV`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfoResponse {
    pub model: String,
    pub protocol: String,
    pub firmware: String,
    pub hardware: String,
    pub serial: String,
}

/// Decoded answer to a [`Command`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Command accepted (status 00)
    Ok,
    MotorReady(bool),
    MotorSpeed(MotorSpeed),
    SampleRate(SampleRate),
    DeviceInfo(DeviceInfoResponse),
    VersionInfo(VersionInfoResponse),
    /// Command has no answer
    None,
}

/// Checksum over the status field (`resp[len-4..len-1]`)
pub fn status_checksum_valid(resp: &[u8]) -> bool {
    if resp.len() < 4 {
        return false;
    }
    let tail = &resp[resp.len() - 4..resp.len() - 1];
    ((tail[0].wrapping_add(tail[1])) & 0x3F) + 0x30 == tail[2]
}

/// Checksum byte for a two-digit status
pub fn status_checksum(status: &[u8; 2]) -> u8 {
    ((status[0].wrapping_add(status[1])) & 0x3F) + 0x30
}

fn ascii_number(resp: &[u8], offset: usize, len: usize) -> Result<u32> {
    resp[offset..offset + len].iter().try_fold(0u32, |acc, &b| {
        if b.is_ascii_digit() {
            Ok(acc * 10 + (b - b'0') as u32)
        } else {
            Err(Error::protocol(format!(
                "expected ASCII digits at {}..{} in {:?}",
                offset,
                offset + len,
                String::from_utf8_lossy(resp)
            )))
        }
    })
}

fn ascii_text(resp: &[u8], offset: usize, len: usize) -> String {
    String::from_utf8_lossy(&resp[offset..offset + len])
        .trim()
        .to_string()
}

/// Two-digit firmware field as `major.minor` ("11" -> "1.1")
fn tenths(value: u32) -> String {
    format!("{}.{}", value / 10, value % 10)
}

fn status_description(command: Command, status: u32) -> &'static str {
    match (command, status) {
        (Command::SetMotorSpeed(_), 11) | (Command::SetSampleRate(_), 11) => "invalid parameter",
        (Command::SetMotorSpeed(_), 12) => "motor speed has not stabilized",
        (Command::StartAcquisition, 12) => "motor speed has not stabilized",
        (Command::StartAcquisition, 13) => "motor is stationary",
        _ => "unknown status",
    }
}

fn check_status(command: Command, resp: &[u8], status_offset: usize) -> Result<()> {
    if !status_checksum_valid(resp) {
        return Err(Error::protocol(format!(
            "checksum mismatch in {} response {:?}",
            String::from_utf8_lossy(command.mnemonic()),
            String::from_utf8_lossy(resp)
        )));
    }
    let status = ascii_number(resp, status_offset, 2)?;
    if status != 0 {
        return Err(Error::protocol_with_code(
            format!(
                "{} failed: {} (status {:02})",
                String::from_utf8_lossy(command.mnemonic()),
                status_description(command, status),
                status
            ),
            status as i32,
        ));
    }
    Ok(())
}

/// Validate and decode the answer to `command`
pub fn parse_response(command: Command, resp: &[u8]) -> Result<Response> {
    let expected = command.response_len();
    if expected == 0 {
        return Ok(Response::None);
    }
    if resp.len() != expected {
        return Err(Error::protocol(format!(
            "answer was {} bytes long instead of expected {}",
            resp.len(),
            expected
        )));
    }
    if &resp[..2] != command.mnemonic() {
        return Err(Error::protocol(format!(
            "expected answer to {}, received {:?}",
            String::from_utf8_lossy(command.mnemonic()),
            String::from_utf8_lossy(resp)
        )));
    }

    match command {
        Command::StartAcquisition | Command::StopAcquisition => {
            check_status(command, resp, 2)?;
            Ok(Response::Ok)
        }
        Command::SetMotorSpeed(_) | Command::SetSampleRate(_) => {
            let echoed = ascii_number(resp, 2, 2)?;
            if Some(echoed as u8) != command.parameter() {
                return Err(Error::protocol(format!(
                    "{} echoed parameter {:02}",
                    String::from_utf8_lossy(command.mnemonic()),
                    echoed
                )));
            }
            check_status(command, resp, 5)?;
            Ok(Response::Ok)
        }
        Command::MotorReady => Ok(Response::MotorReady(ascii_number(resp, 2, 2)? == 0)),
        Command::MotorInfo => {
            let hz = ascii_number(resp, 2, 2)?;
            Ok(Response::MotorSpeed(MotorSpeed::new(hz.min(255) as u8)?))
        }
        Command::SampleRateInfo => {
            let code = ascii_number(resp, 2, 2)?;
            SampleRate::from_code(code)
                .map(Response::SampleRate)
                .ok_or_else(|| Error::protocol(format!("unknown sample rate code {:02}", code)))
        }
        Command::DeviceInfo => Ok(Response::DeviceInfo(DeviceInfoResponse {
            bit_rate: ascii_number(resp, 2, 6)?,
            laser_state: ascii_number(resp, 8, 1)? as u8,
            mode: ascii_number(resp, 9, 1)? as u8,
            diagnostic: ascii_number(resp, 10, 1)? as u8,
            motor_speed: ascii_number(resp, 11, 2)
                .ok()
                .and_then(|hz| MotorSpeed::new(hz.min(255) as u8).ok()),
            sample_rate: ascii_number(resp, 13, 4).ok().and_then(SampleRate::from_hz),
        })),
        Command::VersionInfo => Ok(Response::VersionInfo(VersionInfoResponse {
            model: ascii_text(resp, 2, 5),
            protocol: tenths(ascii_number(resp, 7, 2)?),
            firmware: tenths(ascii_number(resp, 9, 2)?),
            hardware: ascii_text(resp, 11, 1),
            serial: ascii_text(resp, 12, 8),
        })),
        Command::Reset => Ok(Response::None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a status-carrying response with a correct checksum
    fn status_response(prefix: &[u8], status: &[u8; 2]) -> Vec<u8> {
        let mut out = prefix.to_vec();
        out.extend_from_slice(status);
        out.push(status_checksum(status));
        out.push(b'\n');
        out
    }

    #[test]
    fn test_encode() {
        assert_eq!(Command::StartAcquisition.encode(), b"DS\n");
        assert_eq!(
            Command::SetMotorSpeed(MotorSpeed::new(5).unwrap()).encode(),
            b"MS05\n"
        );
        assert_eq!(Command::SetSampleRate(SampleRate::Hz1000).encode(), b"LR03\n");
        assert_eq!(Command::Reset.response_len(), 0);
    }

    #[test]
    fn test_status_checksum() {
        assert_eq!(status_checksum(b"00"), b'P');
        assert!(status_checksum_valid(b"MS05\n00P\n"));
        assert!(status_checksum_valid(b"DS00P\n"));
        assert!(!status_checksum_valid(b"DS00Q\n"));
        // "12": (0x31 + 0x32) & 0x3F = 0x23, + 0x30 = 0x53
        assert_eq!(status_checksum(b"12"), b'S');
    }

    #[test]
    fn test_set_motor_speed_success() {
        let cmd = Command::SetMotorSpeed(MotorSpeed::new(5).unwrap());
        assert_eq!(parse_response(cmd, b"MS05\n00P\n").unwrap(), Response::Ok);
    }

    #[test]
    fn test_set_motor_speed_failures() {
        let cmd = Command::SetMotorSpeed(MotorSpeed::new(5).unwrap());

        // Wrong echo
        assert!(parse_response(cmd, b"MS06\n00P\n").is_err());
        // Bad checksum
        assert!(parse_response(cmd, b"MS05\n00Q\n").is_err());
        // Wrong mnemonic
        assert!(parse_response(cmd, b"LR05\n00P\n").is_err());
        // Device status 12
        let resp = status_response(b"MS05\n", b"12");
        match parse_response(cmd, &resp).unwrap_err() {
            Error::Protocol { code, message } => {
                assert_eq!(code, Some(12));
                assert!(message.contains("not stabilized"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_short_answer_rejected() {
        assert!(parse_response(Command::StartAcquisition, b"DS00").is_err());
    }

    #[test]
    fn test_motor_queries() {
        assert_eq!(
            parse_response(Command::MotorReady, b"MZ00\n").unwrap(),
            Response::MotorReady(true)
        );
        assert_eq!(
            parse_response(Command::MotorReady, b"MZ01\n").unwrap(),
            Response::MotorReady(false)
        );
        assert_eq!(
            parse_response(Command::MotorInfo, b"MI07\n").unwrap(),
            Response::MotorSpeed(MotorSpeed::new(7).unwrap())
        );
        assert_eq!(
            parse_response(Command::SampleRateInfo, b"LI02\n").unwrap(),
            Response::SampleRate(SampleRate::Hz750)
        );
        assert!(parse_response(Command::SampleRateInfo, b"LI09\n").is_err());
    }

    #[test]
    fn test_device_info() {
        let resp = b"ID115200110050500\n";
        assert_eq!(resp.len(), 18);
        match parse_response(Command::DeviceInfo, resp).unwrap() {
            Response::DeviceInfo(info) => {
                assert_eq!(info.bit_rate, 115_200);
                assert_eq!(info.laser_state, 1);
                assert_eq!(info.mode, 1);
                assert_eq!(info.diagnostic, 0);
                assert_eq!(info.motor_speed, Some(MotorSpeed::new(5).unwrap()));
                assert_eq!(info.sample_rate, Some(SampleRate::Hz500));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_version_info() {
        let resp = b"IVSWEEP1117100000042\n";
        assert_eq!(resp.len(), 21);
        match parse_response(Command::VersionInfo, resp).unwrap() {
            Response::VersionInfo(info) => {
                assert_eq!(info.model, "SWEEP");
                assert_eq!(info.protocol, "1.1");
                assert_eq!(info.firmware, "1.7");
                assert_eq!(info.hardware, "1");
                assert_eq!(info.serial, "00000042");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_motor_speed_range() {
        assert!(MotorSpeed::new(10).is_ok());
        assert!(matches!(MotorSpeed::new(11), Err(Error::InvalidParameter(_))));
    }
}
