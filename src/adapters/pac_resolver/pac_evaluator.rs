use crate::domain::{parse_pac_result, ProxyError, ProxyServer, Result};
use js_sandbox::{JsValue, Script};
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs, UdpSocket};
use url::Url;

const PAC_UTILS: &str = include_str!("../../pac_utils.js");

/// PAC helpers that need the target host resolved beforehand
const DNS_HELPERS: [&str; 3] = ["dnsResolve", "isResolvable", "isInNet"];

fn load(pac_file: &str) -> Result<Script> {
    let pac_payload = format!("{}\n{}", pac_file, PAC_UTILS);

    Script::from_string(&pac_payload)
        .map_err(|e| ProxyError::ResolverInitFailed(format!("PAC script error: {}", e)))
}

/// Compile a PAC file and check that it defines `FindProxyForURL`
pub fn compile_pac(pac_file: &str) -> Result<()> {
    let mut script = load(pac_file)?;

    let defined: JsValue = script
        .call("__nanopacHasFindProxy", (String::new(),))
        .map_err(|e| ProxyError::ResolverInitFailed(format!("PAC execution error: {}", e)))?;

    match defined.as_bool() {
        Some(true) => Ok(()),
        _ => Err(ProxyError::ResolverInitFailed(
            "PAC script does not define FindProxyForURL".into(),
        )),
    }
}

/// URL as handed to `FindProxyForURL`: credentials and fragment removed,
/// and only scheme, host and port for secure schemes.
pub fn pac_visible_url(target: &Url) -> String {
    let mut url = target.clone();
    let _ = url.set_username("");
    let _ = url.set_password(None);
    url.set_fragment(None);

    if matches!(url.scheme(), "https" | "wss") {
        url.set_path("/");
        url.set_query(None);
    }
    url.to_string()
}

/// Evaluate a PAC file to get the proxy candidates for a target URL
pub fn evaluate_pac(pac_file: &str, target: &Url) -> Result<Vec<ProxyServer>> {
    let host = target
        .host_str()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
        .ok_or_else(|| ProxyError::InvalidUri(format!("{} has no host", target)))?;

    let host_ip = if DNS_HELPERS.iter().any(|helper| pac_file.contains(helper)) {
        resolve_host(host)
    } else {
        None
    };

    let mut script = load(pac_file)?;
    let eval_result: JsValue = script
        .call(
            "__nanopacFindProxy",
            (pac_visible_url(target), host.to_string(), host_ip, my_ip_address()),
        )
        .map_err(|e| ProxyError::ResolveFailed(format!("PAC execution error: {}", e)))?;

    let result = eval_result
        .as_str()
        .ok_or_else(|| ProxyError::ResolveFailed(format!("FindProxyForURL returned {}", eval_result)))?;

    Ok(parse_pac_result(result))
}

fn resolve_host(host: &str) -> Option<String> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Some(ip.to_string());
    }
    (host, 0)
        .to_socket_addrs()
        .ok()?
        .find(|addr| addr.is_ipv4())
        .map(|addr| addr.ip().to_string())
}

/// Address of the interface that routes to the outside. Nothing is sent.
fn my_ip_address() -> String {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect((Ipv4Addr::new(198, 51, 100, 1), 80))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAC: &str = r#"
        function FindProxyForURL(url, host) {
            if (isPlainHostName(host)) {
                return "DIRECT";
            }
            if (shExpMatch(url, "https://*")) {
                return "HTTPS secure.proxy:443; " + "PROXY fallback:8080";
            }
            return "PROXY default:8080; SOCKS5 socks:1080; DIRECT";
        }
    "#;

    fn eval(url: &str) -> Vec<ProxyServer> {
        evaluate_pac(PAC, &url.parse().unwrap()).unwrap()
    }

    #[test]
    fn test_plain_hostnames_go_direct() {
        assert_eq!(eval("http://intranet/"), vec![ProxyServer::Direct]);
    }

    #[test]
    fn test_net_helpers() {
        let pac = r#"
            function FindProxyForURL(url, host) {
                if (isInNet(host, "10.0.0.0", "255.0.0.0")) {
                    return "PROXY internal:3128";
                }
                return "DIRECT";
            }
        "#;
        let inside = evaluate_pac(pac, &"http://10.1.2.3/".parse().unwrap()).unwrap();
        assert_eq!(inside, vec![ProxyServer::http("internal", 3128)]);
        let outside = evaluate_pac(pac, &"http://192.168.1.1/".parse().unwrap()).unwrap();
        assert_eq!(outside, vec![ProxyServer::Direct]);
    }

    #[test]
    fn test_result_parsing() {
        let proxies = eval("http://www.example.com/index.html");
        assert_eq!(proxies.len(), 3);
        assert_eq!(proxies[0], ProxyServer::http("default", 8080));
        assert_eq!(proxies[1].to_string(), "socks5://socks:1080");
        assert!(proxies[2].is_direct());

        let secure = eval("https://www.example.com/");
        assert_eq!(secure[0].to_string(), "https://secure.proxy:443");
    }

    #[test]
    fn test_secure_urls_are_stripped() {
        let url: Url = "https://user:pw@example.com:8443/a/b?c=d#frag".parse().unwrap();
        assert_eq!(pac_visible_url(&url), "https://example.com:8443/");

        let url: Url = "http://user@example.com/a?b#c".parse().unwrap();
        assert_eq!(pac_visible_url(&url), "http://example.com/a?b");
    }

    #[test]
    fn test_compile_checks_entry_point() {
        assert!(compile_pac(PAC).is_ok());
        assert!(matches!(
            compile_pac("function main() { return 1; }"),
            Err(ProxyError::ResolverInitFailed(_))
        ));
        assert!(compile_pac("function FindProxyForURL(url, host) {").is_err());
    }
}
