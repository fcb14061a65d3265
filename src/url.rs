//! `scheme://host:port[/path]` parsing and scheme-to-protocol inference
//! for `listen`/`connect`.

use crate::error::ManagerError;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Scheme {
    Tcp,
    Udp,
    Http,
    Https,
    Ws,
    Wss,
    Mqtt,
    Mqtts,
}

impl Scheme {
    fn parse(s: &str) -> Option<Scheme> {
        match s {
            "tcp" => Some(Scheme::Tcp),
            "udp" => Some(Scheme::Udp),
            "http" => Some(Scheme::Http),
            "https" => Some(Scheme::Https),
            "ws" => Some(Scheme::Ws),
            "wss" => Some(Scheme::Wss),
            "mqtt" => Some(Scheme::Mqtt),
            "mqtts" => Some(Scheme::Mqtts),
            _ => None,
        }
    }

    /// Whether this scheme implies the HTTP protocol should be turned on
    /// by default, absent an explicit `http` override.
    pub fn infers_http(&self) -> bool {
        matches!(self, Scheme::Http | Scheme::Https | Scheme::Ws | Scheme::Wss)
    }

    pub fn is_udp(&self) -> bool {
        matches!(self, Scheme::Udp)
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Scheme::Https | Scheme::Wss | Scheme::Mqtts)
    }

    pub fn is_mqtt(&self) -> bool {
        matches!(self, Scheme::Mqtt | Scheme::Mqtts)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Url {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Url {
    pub fn parse(s: &str) -> Result<Url, ManagerError> {
        let (scheme_str, rest) = s
            .split_once("://")
            .ok_or_else(|| ManagerError::InvalidUrl(s.to_string()))?;

        let scheme = Scheme::parse(scheme_str).ok_or_else(|| ManagerError::InvalidUrl(s.to_string()))?;

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };

        if authority.is_empty() {
            return Err(ManagerError::InvalidUrl(s.to_string()));
        }

        let (host, port_str) = authority
            .rsplit_once(':')
            .ok_or_else(|| ManagerError::InvalidUrl(s.to_string()))?;

        if host.is_empty() {
            return Err(ManagerError::InvalidUrl(s.to_string()));
        }

        let port: u16 = port_str
            .parse()
            .map_err(|_| ManagerError::InvalidUrl(s.to_string()))?;

        Ok(Url {
            scheme,
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_http_with_ephemeral_port() {
        let url = Url::parse("http://127.0.0.1:0").unwrap();
        assert_eq!(url.scheme, Scheme::Http);
        assert_eq!(url.host, "127.0.0.1");
        assert_eq!(url.port, 0);
        assert_eq!(url.path, "/");
        assert!(url.scheme.infers_http());
    }

    #[test]
    fn parses_path() {
        let url = Url::parse("ws://example.com:8080/chat").unwrap();
        assert_eq!(url.path, "/chat");
    }

    #[test]
    fn tcp_does_not_infer_http() {
        let url = Url::parse("tcp://127.0.0.1:9000").unwrap();
        assert!(!url.scheme.infers_http());
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(Url::parse("ftp://127.0.0.1:21").is_err());
    }

    #[test]
    fn rejects_missing_port() {
        assert!(Url::parse("http://127.0.0.1").is_err());
    }
}
