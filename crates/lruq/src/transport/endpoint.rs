use crate::{Error, Result};
use core::{fmt, str::FromStr};
use std::path::PathBuf;

/// Where a socket binds or connects.
///
/// - `inproc://name`: in-process, scoped to one [`Context`](crate::Context).
/// - `tcp://host:port`: TCP. Port `0` binds an ephemeral port; the bound
///   socket reports the real one.
/// - `ipc://path`: Unix domain socket (unix only).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Inproc(String),
    Tcp(String),
    Ipc(PathBuf),
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason| Error::InvalidEndpoint {
            endpoint: s.to_string(),
            reason,
        };

        let (scheme, address) = s.split_once("://").ok_or_else(|| invalid("missing `://`"))?;
        if address.is_empty() {
            return Err(invalid("missing address"));
        }

        match scheme {
            "inproc" => Ok(Self::Inproc(address.to_string())),
            "ipc" => Ok(Self::Ipc(PathBuf::from(address))),
            "tcp" => {
                let (host, port) = address
                    .rsplit_once(':')
                    .ok_or_else(|| invalid("expected host:port"))?;
                if host.is_empty() {
                    return Err(invalid("missing host"));
                }
                port.parse::<u16>().map_err(|_| invalid("invalid port"))?;
                Ok(Self::Tcp(address.to_string()))
            }
            _ => Err(invalid("unsupported transport")),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inproc(name) => write!(f, "inproc://{name}"),
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
            Self::Ipc(path) => write!(f, "ipc://{}", path.display()),
        }
    }
}
