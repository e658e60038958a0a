//! SSDP discovery of the bridge on the local network.
//!
//! Sends one M-SEARCH broadcast and reads unicast replies until the deadline,
//! returning the first responder whose headers advertise the requested
//! vendor key. No retries happen here; the caller owns the retry cadence.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::net::UdpSocket;
use std::time::{Duration, Instant};

use log::debug;

const SSDP_MULTICAST_ADDR: &str = "239.255.255.250:1900";
const SSDP_MX_SECS: u32 = 2;
const READ_SLICE: Duration = Duration::from_millis(250);

#[derive(Debug)]
pub enum DiscoveryError {
    /// Nothing on the network advertised the requested key before the deadline.
    NotFound,
    Io(std::io::Error),
}

impl core::fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DiscoveryError::NotFound => write!(f, "no bridge answered the discovery broadcast"),
            DiscoveryError::Io(e) => write!(f, "discovery socket error: {}", e),
        }
    }
}

impl std::error::Error for DiscoveryError {}

impl From<std::io::Error> for DiscoveryError {
    fn from(value: std::io::Error) -> Self {
        DiscoveryError::Io(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredBridge {
    pub ip_address: String,
    /// Requested extra headers, lowercase-keyed, as advertised by the device.
    pub attributes: BTreeMap<String, String>,
}

/// Locate a device by `service_key` (a header its SSDP replies must carry),
/// verifying it serves on `port` and collecting `extra_keys` header values.
pub fn discover(
    service_key: &str,
    port: &str,
    extra_keys: &[&str],
    timeout: Duration,
) -> Result<DiscoveredBridge, DiscoveryError> {
    let socket = UdpSocket::bind(("0.0.0.0", 0))?;
    socket.set_read_timeout(Some(READ_SLICE))?;

    let request = build_msearch();
    socket.send_to(request.as_bytes(), SSDP_MULTICAST_ADDR)?;

    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; 2048];
    loop {
        if Instant::now() >= deadline {
            return Err(DiscoveryError::NotFound);
        }
        match socket.recv_from(&mut buf) {
            Ok((len, src)) => {
                let response = String::from_utf8_lossy(&buf[..len]);
                debug!("Discovery: reply from {}", src);
                if let Some(bridge) =
                    bridge_from_response(&response, &src.ip().to_string(), service_key, port, extra_keys)
                {
                    return Ok(bridge);
                }
            }
            // Read slice elapsed without a datagram; loop to re-check the deadline.
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {}
            Err(e) => return Err(DiscoveryError::Io(e)),
        }
    }
}

fn build_msearch() -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {}\r\n\
         ST: ssdp:all\r\n\
         \r\n",
        SSDP_MULTICAST_ADDR, SSDP_MX_SECS
    )
}

/// Parse the header block of an SSDP reply into a lowercase-keyed map.
/// The status line and anything without a colon are skipped.
fn parse_headers(response: &str) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    for line in response.lines().skip(1) {
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
    headers
}

/// Host and port of an SSDP LOCATION url. Port defaults to 80 when the url
/// does not carry one.
fn parse_location(location: &str) -> Option<(String, String)> {
    let rest = location
        .strip_prefix("http://")
        .or_else(|| location.strip_prefix("https://"))?;
    let authority = rest.split('/').next()?;
    if authority.is_empty() {
        return None;
    }
    match authority.split_once(':') {
        Some((host, port)) if !host.is_empty() && !port.is_empty() => {
            Some((host.to_string(), port.to_string()))
        }
        Some(_) => None,
        None => Some((authority.to_string(), String::from("80"))),
    }
}

/// Decide whether one SSDP reply is the device we want, and extract its
/// address plus the requested attributes if so.
fn bridge_from_response(
    response: &str,
    src_ip: &str,
    service_key: &str,
    port: &str,
    extra_keys: &[&str],
) -> Option<DiscoveredBridge> {
    let headers = parse_headers(response);
    if !headers.contains_key(&service_key.to_ascii_lowercase()) {
        return None;
    }

    let ip_address = match headers.get("location").and_then(|l| parse_location(l)) {
        Some((host, advertised_port)) => {
            if advertised_port != port {
                debug!(
                    "Discovery: {} advertises port {} instead of {}; skipping",
                    host, advertised_port, port
                );
                return None;
            }
            host
        }
        // No usable LOCATION header; the datagram source is the device.
        None => src_ip.to_string(),
    };

    let mut attributes = BTreeMap::new();
    for key in extra_keys {
        let lowered = key.to_ascii_lowercase();
        if let Some(value) = headers.get(&lowered) {
            attributes.insert(lowered, value.clone());
        }
    }

    Some(DiscoveredBridge { ip_address, attributes })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HUE_REPLY: &str = "HTTP/1.1 200 OK\r\n\
        HOST: 239.255.255.250:1900\r\n\
        EXT:\r\n\
        CACHE-CONTROL: max-age=100\r\n\
        LOCATION: http://192.168.1.40:80/description.xml\r\n\
        SERVER: Hue/1.0 UPnP/1.0 IpBridge/1.53.0\r\n\
        hue-bridgeid: 001788FFFE23A412\r\n\
        ST: upnp:rootdevice\r\n\
        USN: uuid:2f402f80-da50-11e1-9b23-00178823a412::upnp:rootdevice\r\n\
        \r\n";

    #[test]
    fn parses_reply_headers_lowercase() {
        let headers = parse_headers(HUE_REPLY);
        assert_eq!(
            headers.get("location").map(String::as_str),
            Some("http://192.168.1.40:80/description.xml")
        );
        assert_eq!(headers.get("hue-bridgeid").map(String::as_str), Some("001788FFFE23A412"));
        assert!(!headers.contains_key("LOCATION"));
    }

    #[test]
    fn matching_reply_yields_bridge_with_attributes() {
        let bridge = bridge_from_response(HUE_REPLY, "192.168.1.40", "hue-bridgeid", "80", &["hue-bridgeid"])
            .expect("bridge matched");
        assert_eq!(bridge.ip_address, "192.168.1.40");
        assert_eq!(
            bridge.attributes.get("hue-bridgeid").map(String::as_str),
            Some("001788FFFE23A412")
        );
    }

    #[test]
    fn reply_without_service_key_is_ignored() {
        let reply = "HTTP/1.1 200 OK\r\n\
            LOCATION: http://192.168.1.15:80/desc.xml\r\n\
            SERVER: Sonos/1.0\r\n\
            \r\n";
        assert!(bridge_from_response(reply, "192.168.1.15", "hue-bridgeid", "80", &[]).is_none());
    }

    #[test]
    fn reply_on_unexpected_port_is_ignored() {
        let reply = "HTTP/1.1 200 OK\r\n\
            LOCATION: http://192.168.1.40:8080/description.xml\r\n\
            hue-bridgeid: 001788FFFE23A412\r\n\
            \r\n";
        assert!(bridge_from_response(reply, "192.168.1.40", "hue-bridgeid", "80", &[]).is_none());
    }

    #[test]
    fn missing_location_falls_back_to_source_address() {
        let reply = "HTTP/1.1 200 OK\r\n\
            hue-bridgeid: 001788FFFE23A412\r\n\
            \r\n";
        let bridge = bridge_from_response(reply, "192.168.1.77", "hue-bridgeid", "80", &[])
            .expect("bridge matched");
        assert_eq!(bridge.ip_address, "192.168.1.77");
    }

    #[test]
    fn location_parsing_handles_ports_and_defaults() {
        assert_eq!(
            parse_location("http://192.168.1.40:80/description.xml"),
            Some(("192.168.1.40".to_string(), "80".to_string()))
        );
        assert_eq!(
            parse_location("http://192.168.1.40/description.xml"),
            Some(("192.168.1.40".to_string(), "80".to_string()))
        );
        assert_eq!(
            parse_location("https://bridge.local:443/"),
            Some(("bridge.local".to_string(), "443".to_string()))
        );
        assert_eq!(parse_location("ftp://192.168.1.40/"), None);
        assert_eq!(parse_location("http://"), None);
    }
}
