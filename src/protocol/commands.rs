//! Module `commands`
//!
//! Defines the FTP commands understood by the server and the parser that
//! turns a raw control-connection line into one of them.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

use crate::error::ProtocolError;

/// Representation type selected with `TYPE`. Transfers are always binary;
/// the value is only echoed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferType {
    Ascii,
    #[default]
    Image,
}

impl TransferType {
    pub fn mode_name(self) -> &'static str {
        match self {
            TransferType::Ascii => "ASCII",
            TransferType::Image => "BINARY",
        }
    }
}

/// Represents an FTP command parsed from the client input.
///
/// Commands that require arguments store them as `String` variants.
#[derive(Debug, PartialEq)]
pub enum Command {
    USER(String),
    PASS(String),
    PASV,
    PORT(SocketAddrV4),
    LIST(Option<String>),
    RETR(String),
    STOR(String),
    DELE(String),
    RNFR(String),
    RNTO(String),
    MKD(String),
    RMD(String),
    CWD(String),
    CDUP,
    PWD,
    TYPE(TransferType),
    SYST,
    NOOP,
    QUIT,
}

/// Verbs that are valid FTP but outside the supported command set.
const UNSUPPORTED: &[&str] = &[
    "ABOR", "ACCT", "ALLO", "APPE", "AUTH", "EPRT", "EPSV", "FEAT", "HELP", "LANG", "MDTM",
    "MLSD", "MLST", "MODE", "NLST", "OPTS", "PBSZ", "PROT", "REIN", "REST", "SITE", "SIZE",
    "SMNT", "STAT", "STOU", "STRU", "XCUP", "XCWD", "XMKD", "XPWD", "XRMD",
];

impl Command {
    /// Commands accepted before login.
    pub fn allowed_before_login(&self) -> bool {
        matches!(
            self,
            Command::USER(_) | Command::PASS(_) | Command::QUIT | Command::NOOP | Command::SYST
        )
    }
}

// Used for tracing; never prints the password.
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::USER(name) => write!(f, "USER {name}"),
            Command::PASS(_) => write!(f, "PASS ****"),
            Command::PASV => write!(f, "PASV"),
            Command::PORT(addr) => write!(f, "PORT {addr}"),
            Command::LIST(Some(path)) => write!(f, "LIST {path}"),
            Command::LIST(None) => write!(f, "LIST"),
            Command::RETR(path) => write!(f, "RETR {path}"),
            Command::STOR(path) => write!(f, "STOR {path}"),
            Command::DELE(path) => write!(f, "DELE {path}"),
            Command::RNFR(path) => write!(f, "RNFR {path}"),
            Command::RNTO(path) => write!(f, "RNTO {path}"),
            Command::MKD(path) => write!(f, "MKD {path}"),
            Command::RMD(path) => write!(f, "RMD {path}"),
            Command::CWD(path) => write!(f, "CWD {path}"),
            Command::CDUP => write!(f, "CDUP"),
            Command::PWD => write!(f, "PWD"),
            Command::TYPE(t) => write!(f, "TYPE {t:?}"),
            Command::SYST => write!(f, "SYST"),
            Command::NOOP => write!(f, "NOOP"),
            Command::QUIT => write!(f, "QUIT"),
        }
    }
}

/// Parses a raw command line received from a client into a `Command`.
///
/// Known commands with a missing argument yield `MissingArgument`, valid but
/// unsupported FTP verbs yield `NotImplemented`, anything else `Unrecognized`.
pub fn parse_command(raw: &str) -> Result<Command, ProtocolError> {
    let trimmed = raw.trim_end_matches(['\r', '\n']).trim_start();
    let (verb, arg) = match trimmed.split_once(' ') {
        Some((verb, arg)) => (verb, arg.trim()),
        None => (trimmed, ""),
    };
    let verb = verb.to_ascii_uppercase();

    let required = |name: &'static str| -> Result<String, ProtocolError> {
        if arg.is_empty() {
            Err(ProtocolError::MissingArgument(name))
        } else {
            Ok(arg.to_string())
        }
    };

    let command = match verb.as_str() {
        "USER" => Command::USER(required("USER")?),
        // Anonymous clients sometimes send an empty password.
        "PASS" => Command::PASS(arg.to_string()),
        "PASV" => Command::PASV,
        "PORT" => Command::PORT(parse_host_port(&required("PORT")?)?),
        "LIST" => Command::LIST(list_argument(arg)),
        "RETR" => Command::RETR(required("RETR")?),
        "STOR" => Command::STOR(required("STOR")?),
        "DELE" => Command::DELE(required("DELE")?),
        "RNFR" => Command::RNFR(required("RNFR")?),
        "RNTO" => Command::RNTO(required("RNTO")?),
        "MKD" => Command::MKD(required("MKD")?),
        "RMD" => Command::RMD(required("RMD")?),
        "CWD" => Command::CWD(required("CWD")?),
        "CDUP" => Command::CDUP,
        "PWD" => Command::PWD,
        "TYPE" => Command::TYPE(parse_type(&required("TYPE")?)?),
        "SYST" => Command::SYST,
        "NOOP" => Command::NOOP,
        "QUIT" => Command::QUIT,
        other if UNSUPPORTED.contains(&other) => {
            return Err(ProtocolError::NotImplemented(other.to_string()));
        }
        other => return Err(ProtocolError::Unrecognized(other.to_string())),
    };

    Ok(command)
}

/// `LIST -la` style flags are accepted and ignored.
fn list_argument(arg: &str) -> Option<String> {
    let path: Vec<&str> = arg
        .split_whitespace()
        .filter(|part| !part.starts_with('-'))
        .collect();
    if path.is_empty() {
        None
    } else {
        Some(path.join(" "))
    }
}

fn parse_type(arg: &str) -> Result<TransferType, ProtocolError> {
    let mut parts = arg.split_whitespace();
    match parts.next().map(|p| p.to_ascii_uppercase()).as_deref() {
        Some("A") => Ok(TransferType::Ascii),
        Some("I") => Ok(TransferType::Image),
        Some("L") if parts.next() == Some("8") => Ok(TransferType::Image),
        _ => Err(ProtocolError::InvalidArgument(format!("TYPE {arg}"))),
    }
}

/// Parses the RFC 959 `h1,h2,h3,h4,p1,p2` host-port argument of `PORT`.
pub fn parse_host_port(arg: &str) -> Result<SocketAddrV4, ProtocolError> {
    let invalid = || ProtocolError::InvalidArgument(format!("PORT {arg}"));

    let octets: Vec<u8> = arg
        .split(',')
        .map(|part| part.trim().parse::<u8>())
        .collect::<Result<_, _>>()
        .map_err(|_| invalid())?;

    match octets.as_slice() {
        [h1, h2, h3, h4, p1, p2] => Ok(SocketAddrV4::new(
            Ipv4Addr::new(*h1, *h2, *h3, *h4),
            u16::from(*p1) << 8 | u16::from(*p2),
        )),
        _ => Err(invalid()),
    }
}
