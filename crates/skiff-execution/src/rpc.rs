/// Addressing information for a peer endpoint.
/// Connection establishment and wire framing belong to the transport
/// layer, which sits outside this crate; clients in this crate are
/// typed handles that deliver events to the peer actor.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub host: String,
    pub port: u16,
}

impl ClientOptions {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_options_address() {
        let options = ClientOptions {
            host: "127.0.0.1".to_string(),
            port: 12346,
        };
        assert_eq!(options.address(), "127.0.0.1:12346");
    }
}
