//! WireGuard configuration file parser
//!
//! Parses the `[Interface]` and `[Peer]` sections of a `.conf` file, keeping
//! only what the handshake core needs: keys, the listen port and the
//! persistent keepalive interval. Addressing and routing keys belong to the
//! tunnel layer and are refused.

use std::path::Path;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use zeroize::Zeroize;

use crate::crypto::secret::Secret32;
use crate::crypto::x25519::StaticKeypair;
use crate::error::ConfigError;
use crate::protocol::session::Peer;

/// Complete noiseguard configuration
#[derive(Debug, Clone)]
pub struct NoiseGuardConfig {
    /// Interface configuration (our side)
    pub interface: InterfaceConfig,
    /// Peer configurations
    pub peers: Vec<PeerConfig>,
}

/// Interface (local) configuration
#[derive(Debug, Clone)]
pub struct InterfaceConfig {
    /// Our static private key
    pub private_key: Secret32,
    /// Listen port (optional, for responders)
    pub listen_port: Option<u16>,
}

/// Peer configuration
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Peer's public key (32 bytes)
    pub public_key: [u8; 32],
    /// Pre-shared key (optional)
    pub preshared_key: Option<Secret32>,
    /// Keepalive interval in seconds (optional)
    pub persistent_keepalive: Option<u16>,
}

impl PeerConfig {
    pub fn persistent_keepalive_interval(&self) -> Option<Duration> {
        self.persistent_keepalive
            .filter(|&secs| secs > 0)
            .map(|secs| Duration::from_secs(u64::from(secs)))
    }
}

impl NoiseGuardConfig {
    /// Parse a configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                ConfigError::Io(e)
            }
        })?;
        let parsed = Self::parse(&content);
        content.zeroize();
        parsed
    }

    /// Parse a configuration from a string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut private_key: Option<Secret32> = None;
        let mut listen_port: Option<u16> = None;
        let mut seen_interface = false;
        let mut peers: Vec<PeerConfig> = Vec::new();
        let mut current_section: Option<Section> = None;
        let mut current_peer: Option<PeerBuilder> = None;

        for (line_num, line) in content.lines().enumerate() {
            let line_num = line_num + 1;
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if line.eq_ignore_ascii_case("[interface]") {
                if let Some(peer) = current_peer.take() {
                    peers.push(peer.build()?);
                }
                if seen_interface {
                    return Err(ConfigError::ParseError {
                        line: line_num,
                        message: "Duplicate [Interface] section".to_string(),
                    });
                }
                seen_interface = true;
                current_section = Some(Section::Interface);
                continue;
            } else if line.eq_ignore_ascii_case("[peer]") {
                if let Some(peer) = current_peer.take() {
                    peers.push(peer.build()?);
                }
                current_section = Some(Section::Peer);
                current_peer = Some(PeerBuilder::default());
                continue;
            } else if line.starts_with('[') {
                return Err(ConfigError::ParseError {
                    line: line_num,
                    message: format!("Unknown section: {}", line),
                });
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::ParseError {
                    line: line_num,
                    message: format!("Expected 'key = value', got: {}", line),
                });
            };

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match current_section {
                Some(Section::Interface) => match key.as_str() {
                    "privatekey" => {
                        private_key = Some(Secret32::new(parse_key(value, "PrivateKey")?));
                    }
                    "listenport" => {
                        listen_port = Some(value.parse().map_err(|_| ConfigError::ParseError {
                            line: line_num,
                            message: format!("Invalid ListenPort: {}", value),
                        })?);
                    }
                    _ => return Err(unknown_key(line_num, "Interface", &key)),
                },
                Some(Section::Peer) => {
                    let peer = current_peer.as_mut().ok_or(ConfigError::ParseError {
                        line: line_num,
                        message: "Peer value outside of [Peer] section".to_string(),
                    })?;

                    match key.as_str() {
                        "publickey" => {
                            peer.public_key = Some(parse_key(value, "PublicKey")?);
                        }
                        "presharedkey" => {
                            peer.preshared_key =
                                Some(Secret32::new(parse_key(value, "PresharedKey")?));
                        }
                        "persistentkeepalive" => {
                            peer.persistent_keepalive = parse_keepalive(value, line_num)?;
                        }
                        _ => return Err(unknown_key(line_num, "Peer", &key)),
                    }
                }
                None => {
                    return Err(ConfigError::ParseError {
                        line: line_num,
                        message: "Configuration value outside of any section".to_string(),
                    });
                }
            }
        }

        if let Some(peer) = current_peer.take() {
            peers.push(peer.build()?);
        }

        if !seen_interface {
            return Err(ConfigError::MissingField {
                field: "[Interface] section".to_string(),
            });
        }
        let private_key = private_key.ok_or(ConfigError::MissingField {
            field: "PrivateKey".to_string(),
        })?;

        tracing::debug!("Parsed config with {} peer(s)", peers.len());

        Ok(NoiseGuardConfig {
            interface: InterfaceConfig {
                private_key,
                listen_port,
            },
            peers,
        })
    }

    /// Our static key pair
    pub fn keypair(&self) -> StaticKeypair {
        StaticKeypair::from_private(self.interface.private_key.clone())
    }

    /// Get our public key derived from the private key
    pub fn public_key(&self) -> [u8; 32] {
        *self.keypair().public()
    }

    /// One session state per configured peer
    pub fn build_peers(&self) -> Vec<Peer> {
        let local = self.keypair();
        self.peers
            .iter()
            .map(|p| {
                Peer::new(
                    local.clone(),
                    p.public_key,
                    p.preshared_key.clone(),
                    p.persistent_keepalive_interval(),
                )
            })
            .collect()
    }
}

/// Section type during parsing
#[derive(Clone, Copy)]
enum Section {
    Interface,
    Peer,
}

/// Builder for PeerConfig during parsing
#[derive(Default)]
struct PeerBuilder {
    public_key: Option<[u8; 32]>,
    preshared_key: Option<Secret32>,
    persistent_keepalive: Option<u16>,
}

impl PeerBuilder {
    fn build(self) -> Result<PeerConfig, ConfigError> {
        let public_key = self.public_key.ok_or(ConfigError::MissingField {
            field: "PublicKey in [Peer]".to_string(),
        })?;

        Ok(PeerConfig {
            public_key,
            preshared_key: self.preshared_key,
            persistent_keepalive: self.persistent_keepalive,
        })
    }
}

fn unknown_key(line: usize, section: &str, key: &str) -> ConfigError {
    ConfigError::ParseError {
        line,
        message: format!("Unsupported key in [{}]: {}", section, key),
    }
}

/// `off` or a number of seconds
fn parse_keepalive(value: &str, line: usize) -> Result<Option<u16>, ConfigError> {
    if value.eq_ignore_ascii_case("off") {
        return Ok(None);
    }
    value.parse().map(Some).map_err(|_| ConfigError::ParseError {
        line,
        message: format!("Invalid PersistentKeepalive: {}", value),
    })
}

/// Parse a base64-encoded 32-byte key
pub fn parse_key(value: &str, field_name: &str) -> Result<[u8; 32], ConfigError> {
    let mut bytes = BASE64
        .decode(value)
        .map_err(|_| ConfigError::InvalidKey {
            field: field_name.to_string(),
        })?;

    let key: Result<[u8; 32], _> = bytes.as_slice().try_into();
    bytes.zeroize();
    key.map_err(|_| ConfigError::InvalidKey {
        field: field_name.to_string(),
    })
}

/// Encode a 32-byte key as base64
pub fn encode_key(key: &[u8; 32]) -> String {
    BASE64.encode(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TEST_CONFIG: &str = r#"
[Interface]
PrivateKey = UOvtcWdILFwjb1UnsnK+a9lcqYvNTmtPv+fvqIVOz3w=
ListenPort = 51820

[Peer]
PublicKey = YgkBjKXER5YarD8STsvMFURw/5nhCLIFOJ5uKWrrMW4=
PresharedKey = AQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQE=
PersistentKeepalive = 25

# second peer, no psk
[Peer]
PublicKey = AgICAgICAgICAgICAgICAgICAgICAgICAgICAgICAgI=
"#;

    #[test]
    fn test_parse_config() {
        let config = NoiseGuardConfig::parse(TEST_CONFIG).unwrap();

        assert_eq!(config.interface.listen_port, Some(51820));
        assert_eq!(config.peers.len(), 2);

        let peer = &config.peers[0];
        assert_eq!(peer.persistent_keepalive, Some(25));
        assert_eq!(
            peer.persistent_keepalive_interval(),
            Some(Duration::from_secs(25))
        );
        assert_eq!(peer.preshared_key.as_ref().unwrap().as_bytes(), &[1u8; 32]);

        let second = &config.peers[1];
        assert_eq!(second.public_key, [2u8; 32]);
        assert!(second.preshared_key.is_none());
        assert_eq!(second.persistent_keepalive_interval(), None);
    }

    #[test]
    fn test_public_key_matches_private() {
        let config = NoiseGuardConfig::parse(TEST_CONFIG).unwrap();
        let expected = crate::crypto::x25519::public_key(&config.interface.private_key);
        assert_eq!(config.public_key(), expected);
        assert_eq!(config.build_peers().len(), 2);
    }

    #[test]
    fn test_parse_key() {
        let key_b64 = "UOvtcWdILFwjb1UnsnK+a9lcqYvNTmtPv+fvqIVOz3w=";
        let key = parse_key(key_b64, "TestKey").unwrap();
        assert_eq!(encode_key(&key), key_b64);
    }

    #[test]
    fn test_invalid_key() {
        let result = parse_key("invalid-base64!", "TestKey");
        assert!(result.is_err());

        let result = parse_key("dG9vIHNob3J0", "TestKey"); // "too short" in base64
        assert!(matches!(result, Err(ConfigError::InvalidKey { .. })));
    }

    #[test]
    fn test_missing_interface() {
        let config = "[Peer]\nPublicKey = YgkBjKXER5YarD8STsvMFURw/5nhCLIFOJ5uKWrrMW4=\n";
        let result = NoiseGuardConfig::parse(config);
        assert!(matches!(result, Err(ConfigError::MissingField { .. })));
    }

    #[test]
    fn test_missing_private_key() {
        let config = "[Interface]\nListenPort = 51820\n";
        let result = NoiseGuardConfig::parse(config);
        assert!(matches!(result, Err(ConfigError::MissingField { .. })));
    }

    #[test]
    fn test_peer_without_public_key() {
        let config = "[Interface]\nPrivateKey = UOvtcWdILFwjb1UnsnK+a9lcqYvNTmtPv+fvqIVOz3w=\n[Peer]\nPersistentKeepalive = 5\n";
        assert!(NoiseGuardConfig::parse(config).is_err());
    }

    #[test]
    fn test_routing_keys_rejected() {
        let config = "[Interface]\nPrivateKey = UOvtcWdILFwjb1UnsnK+a9lcqYvNTmtPv+fvqIVOz3w=\nAddress = 10.0.0.2/24\n";
        match NoiseGuardConfig::parse(config) {
            Err(ConfigError::ParseError { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected parse error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_keepalive_off() {
        let config = "[Interface]\nPrivateKey = UOvtcWdILFwjb1UnsnK+a9lcqYvNTmtPv+fvqIVOz3w=\n[Peer]\nPublicKey = YgkBjKXER5YarD8STsvMFURw/5nhCLIFOJ5uKWrrMW4=\nPersistentKeepalive = off\n";
        let config = NoiseGuardConfig::parse(config).unwrap();
        assert_eq!(config.peers[0].persistent_keepalive, None);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TEST_CONFIG.as_bytes()).unwrap();

        let config = NoiseGuardConfig::from_file(file.path()).unwrap();
        assert_eq!(config.peers.len(), 2);
    }

    #[test]
    fn test_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = NoiseGuardConfig::from_file(dir.path().join("absent.conf"));
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }
}
