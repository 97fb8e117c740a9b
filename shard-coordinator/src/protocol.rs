//! Messages exchanged on the controller port.
//!
//! The controller channel carries two kinds of traffic:
//! - registration lines during startup (`APP_MASTER_INFO <host> <port>` from
//!   the job controller, `connect <host> <port>` from each worker)
//! - one response line per forwarded substatement afterwards (`SUCCESS`,
//!   `OUTPUT <block>` or `ERROR <message>`)

use crate::error::ProtocolError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// The job controller announcing where it runs.
    Controller { host: String, port: u16 },
    /// A worker node; `host` becomes its node name.
    Worker { host: String, port: u16 },
}

impl Registration {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(tag) = parts.first() else {
            return Err(ProtocolError::MalformedRegistration(line.to_string()));
        };

        let controller = match *tag {
            "APP_MASTER_INFO" => true,
            "connect" => false,
            _ => return Err(ProtocolError::UnexpectedRegistration(line.to_string())),
        };
        if parts.len() < 3 {
            return Err(ProtocolError::MalformedRegistration(line.to_string()));
        }
        let host = parts[1].to_string();
        let port = parts[2]
            .parse::<u16>()
            .map_err(|_| ProtocolError::MalformedRegistration(line.to_string()))?;

        Ok(if controller {
            Registration::Controller { host, port }
        } else {
            Registration::Worker { host, port }
        })
    }
}

/// What a worker node answered for one substatement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeResponse {
    Success,
    /// Identifier of a result block staged by the node.
    Output(String),
    Error(String),
}

impl NodeResponse {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end();
        if line == "SUCCESS" {
            return Ok(NodeResponse::Success);
        }
        if let Some(block) = line.strip_prefix("OUTPUT ") {
            return Ok(NodeResponse::Output(block.trim().to_string()));
        }
        if line == "ERROR" {
            return Ok(NodeResponse::Error(String::new()));
        }
        if let Some(message) = line.strip_prefix("ERROR ") {
            return Ok(NodeResponse::Error(message.to_string()));
        }
        Err(ProtocolError::UnrecognizedResponse(line.to_string()))
    }
}
