fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::net::IpAddr;
    use std::path::PathBuf;

    use kulucka_protocol::{
        DeviceStatus, Endpoint, ModeChangeRequest, ModeChangeResponse, NetworkMode,
        parse_discovery_response,
    };
    use serde::Deserialize;

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Deserializes a fixture, re-serializes it, and compares the JSON values.
    ///
    /// Field order does not matter; any field the firmware sends that we
    /// drop or rename shows up as a mismatch.
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));
        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  firmware: {fixture}\n  Rust:     {reserialized}"
        );
        parsed
    }

    // --- HTTP bodies ---

    #[test]
    fn fixture_mode_change_request_ap() {
        let req: ModeChangeRequest = roundtrip_test("mode_change_request_ap.json");
        assert_eq!(req, ModeChangeRequest::new(NetworkMode::Ap, None));
    }

    #[test]
    fn fixture_mode_change_request_station() {
        let req: ModeChangeRequest = roundtrip_test("mode_change_request_station.json");
        assert_eq!(req.mode, NetworkMode::Station);
        assert_eq!(req.ssid.as_deref(), Some("HomeNet"));
    }

    #[test]
    fn fixture_mode_change_response() {
        let resp: ModeChangeResponse = roundtrip_test("mode_change_response.json");
        assert!(resp.success);
        assert_eq!(resp.new_ip_hint(), Some("192.168.1.42"));
        assert_eq!(resp.estimated_delay().map(|d| d.as_secs()), Some(8));
    }

    #[test]
    fn fixture_mode_change_response_rejected() {
        let resp: ModeChangeResponse = roundtrip_test("mode_change_response_rejected.json");
        assert!(!resp.success);
        assert_eq!(resp.new_ip_hint(), None);
        assert_eq!(resp.estimated_delay(), None);
    }

    #[test]
    fn fixture_device_status_station() {
        let status: DeviceStatus = roundtrip_test("device_status_station.json");
        assert_eq!(status.mode, NetworkMode::Station);
        assert_eq!(status.rssi, Some(-61));
        assert_eq!(status.device_id.as_deref(), Some("esp32-incubator"));
    }

    #[test]
    fn fixture_device_status_ap() {
        let status: DeviceStatus = roundtrip_test("device_status_ap.json");
        assert_eq!(status.mode, NetworkMode::Ap);
        assert!(!status.connected);
    }

    #[test]
    fn fixture_device_status_extended_fields_ignored() {
        // Newer firmware reports diagnostics we do not model.
        let status: DeviceStatus =
            serde_json::from_value(load_fixture("device_status_extended.json")).unwrap();
        assert_eq!(status.mode, NetworkMode::Station);
        assert_eq!(status.ip, "192.168.1.42");
        assert!(status.device_id.is_none());
    }

    #[test]
    fn fixture_endpoint() {
        let endpoint: Endpoint = roundtrip_test("endpoint.json");
        assert!(endpoint.validate().is_ok());
        assert_eq!(endpoint.base_url(), "http://192.168.1.42:80");
    }

    // --- UDP discovery ---

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct DatagramCase {
        payload: String,
        source: IpAddr,
        device_id: Option<String>,
        port: Option<u16>,
    }

    #[test]
    fn fixture_discovery_datagrams() {
        let cases: Vec<DatagramCase> =
            serde_json::from_value(load_fixture("discovery_datagrams.json")).unwrap();
        assert!(!cases.is_empty());

        for case in cases {
            let parsed = parse_discovery_response(case.payload.as_bytes(), case.source);
            match (&case.device_id, case.port) {
                (Some(id), Some(port)) => {
                    let resp = parsed.unwrap_or_else(|e| {
                        panic!("expected {:?} to parse: {e}", case.payload)
                    });
                    assert_eq!(&resp.device_id, id);
                    assert_eq!(resp.port, port);
                    assert_eq!(resp.source_address, case.source);
                    assert_eq!(resp.endpoint().host, case.source.to_string());
                }
                _ => assert!(
                    parsed.is_err(),
                    "expected {:?} to be rejected",
                    case.payload
                ),
            }
        }
    }
}
