//! Device configuration document
//!
//! The file a device boots from and returns on "get settings":
//!
//! ```json
//! {
//!   "config_version_high": 1, "config_version_low": 10,
//!   "device_kind": 0, "is_use_readonly_checker": false, "is_create_backup": true,
//!   "settings": { "id": "...", "name": "...", "mqtt_broker_ip": "...",
//!                 "cameras": [ { ..., "detectors": [ ... ] } ],
//!                 "http_server": { ... } }
//! }
//! ```
//!
//! Reading goes through the typed field accessors: a missing or mistyped
//! member keeps the record default instead of rejecting the document.

use serde_json::{json, Map, Value};

use super::types::*;
use crate::device_command::ItemValue;
use crate::error::{Error, Result};
use crate::json_fields::{json_path, DynamicSettings, JsonFields};

/// Replacement written over secret values
pub const SECRET_MASK: &str = "************";

/// Parse a device document into a host record
pub fn parse_document(root: &Value) -> Result<Host> {
    let root = root
        .as_object()
        .ok_or_else(|| Error::Parse("configuration document must be a JSON object".to_string()))?;

    let version = ConfigVersion::new(
        root.get_int("config_version_high", 0),
        root.get_int("config_version_low", 0),
    );
    if !version.is_supported() {
        return Err(Error::Config(format!(
            "unsupported configuration version {} (expected {})",
            version, SUPPORTED_CONFIG_VERSION
        )));
    }

    let settings = match root.get("settings") {
        Some(Value::Object(settings)) => settings,
        Some(_) => return Err(Error::Parse("`settings` must be an object".to_string())),
        None => return Err(Error::Parse("missing `settings` object".to_string())),
    };

    let mut host = parse_host_settings(settings);
    host.config_version_high = version.high;
    host.config_version_low = version.low;
    host.device_kind = root.get_int("device_kind", host.device_kind);
    host.is_use_readonly_checker =
        root.get_bool("is_use_readonly_checker", host.is_use_readonly_checker);
    host.is_create_backup = root.get_bool("is_create_backup", host.is_create_backup);

    Ok(host)
}

fn parse_host_settings(s: &Map<String, Value>) -> Host {
    let d = Host::default();

    let cameras = match s.get_object("cameras") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_object)
            .map(parse_camera)
            .collect(),
        _ => Vec::new(),
    };

    let http_server = match s.get_object("http_server") {
        Some(Value::Object(h)) => Some(parse_http_server(h)),
        _ => None,
    };

    Host {
        id: s.get_string("id", &d.id),
        name: s.get_string("name", &d.name),
        mqtt_client_name: s.get_string("mqtt_client_name", &d.mqtt_client_name),
        mqtt_broker_ip: s.get_string("mqtt_broker_ip", &d.mqtt_broker_ip),
        mqtt_broker_port: get_port(s, "mqtt_broker_port", d.mqtt_broker_port),
        mqtt_connection_type: s.get_int("mqtt_connection_type", d.mqtt_connection_type),
        mqtt_login: s.get_string("mqtt_login", &d.mqtt_login),
        mqtt_password: s.get_string("mqtt_password", &d.mqtt_password),
        mqtt_tls_cert_file: s.get_string("mqtt_tls_cert_file", &d.mqtt_tls_cert_file),
        mqtt_command_topic: s.get_string("mqtt_command_topic", &d.mqtt_command_topic),
        mqtt_response_topic: s.get_string("mqtt_response_topic", &d.mqtt_response_topic),
        mqtt_settings_get_topic: s
            .get_string("mqtt_settings_get_topic", &d.mqtt_settings_get_topic),
        mqtt_settings_set_topic: s
            .get_string("mqtt_settings_set_topic", &d.mqtt_settings_set_topic),
        mqtt_error_topic: s.get_string("mqtt_error_topic", &d.mqtt_error_topic),
        mqtt_ping_topic: s.get_string("mqtt_ping_topic", &d.mqtt_ping_topic),
        mqtt_ping_interval: s.get_int("mqtt_ping_interval", d.mqtt_ping_interval),
        readonly_checker_dictionary: s
            .get_string("readonly_checker_dictionary", &d.readonly_checker_dictionary),
        secrets_dictionary: s.get_string("secrets_dictionary", &d.secrets_dictionary),
        settings_backup_path: s.get_string("settings_backup_path", &d.settings_backup_path),
        http_server,
        cameras,
        ..d
    }
}

fn parse_http_server(h: &Map<String, Value>) -> HttpServerSettings {
    let d = HttpServerSettings::default();
    HttpServerSettings {
        device_name: h.get_string("device_name", &d.device_name),
        root_dir: h.get_string("root_dir", &d.root_dir),
        http_port: get_port(h, "http_port", d.http_port),
        https_port: get_port(h, "https_port", d.https_port),
        cert_dir: h.get_string("cert_dir", &d.cert_dir),
        home_page: h.get_string("home_page", &d.home_page),
    }
}

fn parse_camera(c: &Map<String, Value>) -> Camera {
    let d = Camera::default();

    // A non-negative integer selects a local capture device, anything else is a path/URL
    let device = match u32::try_from(c.get_int("device", -1)) {
        Ok(index) => DeviceRef::Index(index),
        Err(_) => DeviceRef::Path(c.get_string("device", "")),
    };

    let detectors = match c.get_object("detectors") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_object)
            .map(parse_detector)
            .collect(),
        _ => Vec::new(),
    };

    Camera {
        id: c.get_string("id", &d.id),
        name: c.get_string("name", &d.name),
        device,
        connection_attempts_count: c
            .get_int("connection_attempts_count", d.connection_attempts_count),
        is_display: c.get_bool("is_display", d.is_display),
        is_use_gpu: c.get_bool("is_use_gpu", d.is_use_gpu),
        is_flip: c.get_bool("is_flip", d.is_flip),
        is_convert_to_gray: get_flag(c, "is_convert_to_gray", d.is_convert_to_gray),
        is_show_mask: c.get_bool("is_show_mask", d.is_show_mask),
        is_sort_results: c.get_bool("is_sort_results", d.is_sort_results),
        rotate_angle: c.get_double("rotate_angle", d.rotate_angle),
        frame_width: c.get_int("frame_width", d.frame_width),
        frame_height: c.get_int("frame_height", d.frame_height),
        resize_x: c.get_int("resize_x", d.resize_x),
        resize_y: c.get_int("resize_y", d.resize_y),
        object_detector_kind: c.get_int("object_detector_kind", d.object_detector_kind),
        mqtt_client_name: c.get_string("mqtt_client_name", &d.mqtt_client_name),
        mqtt_broker_ip: c.get_string("mqtt_broker_ip", &d.mqtt_broker_ip),
        mqtt_broker_port: get_port(c, "mqtt_broker_port", d.mqtt_broker_port),
        mqtt_connection_type: c.get_int("mqtt_connection_type", d.mqtt_connection_type),
        mqtt_login: c.get_string("mqtt_login", &d.mqtt_login),
        mqtt_password: c.get_string("mqtt_password", &d.mqtt_password),
        mqtt_tls_cert_file: c.get_string("mqtt_tls_cert_file", &d.mqtt_tls_cert_file),
        mqtt_detection_topic: c.get_string("mqtt_detection_topic", &d.mqtt_detection_topic),
        mqtt_error_topic: c.get_string("mqtt_error_topic", &d.mqtt_error_topic),
        mqtt_ping_topic: c.get_string("mqtt_ping_topic", &d.mqtt_ping_topic),
        mqtt_ping_interval: c.get_int("mqtt_ping_interval", d.mqtt_ping_interval),
        mqtt_is_send_empty: c.get_bool("mqtt_is_send_empty", d.mqtt_is_send_empty),
        video_stream_port: get_port(c, "video_stream_port", d.video_stream_port),
        video_stream_channel: c.get_string("video_stream_channel", &d.video_stream_channel),
        video_stream_login: c.get_string("video_stream_login", &d.video_stream_login),
        video_stream_password: c.get_string("video_stream_password", &d.video_stream_password),
        video_stream_mode: c.get_int("video_stream_mode", d.video_stream_mode),
        video_stream_engine: c.get_int("video_stream_engine", d.video_stream_engine),
        video_stream_max_output_fps: u32::try_from(c.get_int("video_stream_max_output_fps", 0))
            .unwrap_or(d.video_stream_max_output_fps),
        is_use_super_resolution: c
            .get_bool("is_use_super_resolution", d.is_use_super_resolution),
        super_resolution_name: c.get_string("super_resolution_name", &d.super_resolution_name),
        super_resolution_model_path: c
            .get_string("super_resolution_model_path", &d.super_resolution_model_path),
        super_resolution_factor: c.get_int("super_resolution_factor", d.super_resolution_factor),
        on_preprocess: c.get_string("on_preprocess", &d.on_preprocess),
        on_postprocess: c.get_string("on_postprocess", &d.on_postprocess),
        execute_always: c.get_bool("execute_always", d.execute_always),
        execute_mode: c.get_int("execute_mode", d.execute_mode),
        input_kind: c.get_int("input_kind", d.input_kind),
        output_kind: c.get_int("output_kind", d.output_kind),
        background_color: c.get_string("background_color", &d.background_color),
        aliases_path: c.get_string("aliases_path", &d.aliases_path),
        additional: DynamicSettings::parse(c),
        detectors,
    }
}

fn parse_detector(o: &Map<String, Value>) -> Detector {
    let d = Detector::default();
    let id = o.get_int("id", d.id);

    let predecessor = match o.get_object("predecessor") {
        Some(Value::Object(p)) => Some(Predecessor {
            id: p.get_int("id", -1),
            class: p.get_int("class", -1),
        }),
        _ => None,
    };

    Detector {
        id,
        name: o.get_string("name", &d.name),
        // older documents omit `kind` and rely on the id
        kind: o.get_int("kind", id),
        neural_network_id: o.get_int("neural_network_id", d.neural_network_id),
        predecessor,
        input_tensor_name: o.get_string("input_tensor_name", &d.input_tensor_name),
        output_tensor_name: o.get_string("output_tensor_name", &d.output_tensor_name),
        model_path: o.get_string("model_path", &d.model_path),
        labels_path: o.get_string("labels_path", &d.labels_path),
        rules_path: o.get_string("rules_path", &d.rules_path),
        width: o.get_int("width", d.width),
        height: o.get_int("height", d.height),
        chnls: o.get_int("chnls", d.chnls),
        is_use_gpu: o.get_bool("is_use_gpu", d.is_use_gpu),
        is_send_results: o.get_bool("is_send_results", d.is_send_results),
        is_draw_detections: o.get_bool("is_draw_detections", d.is_draw_detections),
        results_mapping_rule: o.get_int("results_mapping_rule", d.results_mapping_rule),
        color: o.get_string("color", &d.color),
        on_detect: o.get_string("on_detect", &d.on_detect),
        execute_always: o.get_bool("execute_always", d.execute_always),
        execute_mode: o.get_int("execute_mode", d.execute_mode),
        additional: DynamicSettings::parse(o),
    }
}

fn get_port(o: &Map<String, Value>, name: &str, default: u16) -> u16 {
    u16::try_from(o.get_int(name, i32::from(default))).unwrap_or(default)
}

/// Boolean stored either as `true`/`false` or as `0`/`1`
fn get_flag(o: &Map<String, Value>, name: &str, default: bool) -> bool {
    match o.get(name) {
        Some(Value::Number(_)) => o.get_int(name, 0) != 0,
        _ => o.get_bool(name, default),
    }
}

/// Devices read some flags as integers; write them back as `0`/`1`
fn flag_as_int(o: &mut Map<String, Value>, name: &str) {
    if let Some(Value::Bool(b)) = o.get(name) {
        let n = i32::from(*b);
        o.insert(name.to_string(), Value::from(n));
    }
}

/// Render a host as a device document
pub fn to_document(host: &Host) -> Result<Value> {
    let mut cameras = serde_json::to_value(&host.cameras)?;
    if let Value::Array(items) = &mut cameras {
        for camera in items.iter_mut().filter_map(Value::as_object_mut) {
            flag_as_int(camera, "is_convert_to_gray");
        }
    }

    let mut settings = json!({
        "id": host.id,
        "name": host.name,
        "mqtt_client_name": host.mqtt_client_name,
        "mqtt_broker_ip": host.mqtt_broker_ip,
        "mqtt_broker_port": host.mqtt_broker_port,
        "mqtt_connection_type": host.mqtt_connection_type,
        "mqtt_login": host.mqtt_login,
        "mqtt_password": host.mqtt_password,
        "mqtt_tls_cert_file": host.mqtt_tls_cert_file,
        "mqtt_command_topic": host.mqtt_command_topic,
        "mqtt_response_topic": host.mqtt_response_topic,
        "mqtt_settings_get_topic": host.mqtt_settings_get_topic,
        "mqtt_settings_set_topic": host.mqtt_settings_set_topic,
        "mqtt_error_topic": host.mqtt_error_topic,
        "mqtt_ping_topic": host.mqtt_ping_topic,
        "mqtt_ping_interval": host.mqtt_ping_interval,
        "readonly_checker_dictionary": host.readonly_checker_dictionary,
        "secrets_dictionary": host.secrets_dictionary,
        "settings_backup_path": host.settings_backup_path,
        "cameras": cameras,
    });
    if let (Some(http), Some(obj)) = (&host.http_server, settings.as_object_mut()) {
        obj.insert("http_server".to_string(), serde_json::to_value(http)?);
    }

    Ok(json!({
        "config_version_high": SUPPORTED_CONFIG_VERSION.high,
        "config_version_low": SUPPORTED_CONFIG_VERSION.low,
        "device_kind": host.device_kind,
        "is_use_readonly_checker": host.is_use_readonly_checker,
        "is_create_backup": host.is_create_backup,
        "settings": settings,
    }))
}

/// Overwrite every listed path that exists with [`SECRET_MASK`]
///
/// Returns the number of values masked.
pub fn mask_secrets<'a>(document: &mut Value, paths: impl IntoIterator<Item = &'a str>) -> usize {
    paths
        .into_iter()
        .filter(|path| json_path::set_path(document, path, Value::String(SECRET_MASK.to_string())))
        .count()
}

/// Apply `path = value` edits, skipping read-only paths
///
/// Returns the number of values written.
pub fn apply_values(document: &mut Value, values: &[ItemValue], read_only: &[String]) -> usize {
    let mut applied = 0;
    for item in values {
        if read_only.iter().any(|p| p == &item.path) {
            tracing::debug!(path = %item.path, "Skipping read-only path");
            continue;
        }
        if json_path::set_path(document, &item.path, item.value.clone()) {
            applied += 1;
        } else {
            tracing::debug!(path = %item.path, "Path not present in document");
        }
    }
    applied
}

/// Read a dictionary file: one path per line, blank lines ignored
pub fn load_dictionary(path: &std::path::Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_dictionary(&text))
}

pub fn parse_dictionary(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        json!({
            "config_version_high": 1,
            "config_version_low": 10,
            "device_kind": 2,
            "is_create_backup": false,
            "settings": {
                "id": "orin-01",
                "name": "Line 1",
                "mqtt_broker_ip": "192.168.0.128",
                "mqtt_broker_port": 1883,
                "mqtt_command_topic": "cs/command",
                "mqtt_response_topic": "cs/response",
                "mqtt_password": "hunter2",
                "cameras": [
                    {
                        "id": "cam0",
                        "device": 0,
                        "rotate_angle": 90,
                        "is_convert_to_gray": 1,
                        "video_stream_port": 8088,
                        "additional": [{"name": "gain", "val": 3}],
                        "detectors": [
                            {"id": 1, "name": "people", "width": 640, "height": 640, "chnls": 3},
                            {"id": 2, "kind": 7, "predecessor": {"id": 1, "class": 0}}
                        ]
                    },
                    {"id": "cam1", "device": "rtsp://10.0.0.5/stream", "mqtt_broker_port": "bad"},
                    "not-a-camera"
                ],
                "http_server": {"http_port": 8080, "home_page": "index.html"}
            }
        })
    }

    #[test]
    fn test_parse_full_document() {
        let host = parse_document(&sample()).unwrap();

        assert_eq!(host.id, "orin-01");
        assert_eq!(host.device_kind, 2);
        assert!(!host.is_create_backup);
        assert_eq!(host.mqtt_broker_port, 1883);
        assert_eq!(host.cameras.len(), 2);
        assert_eq!(host.http_server.as_ref().map(|h| h.http_port), Some(8080));

        let cam0 = host.camera("cam0").unwrap();
        assert_eq!(cam0.device, DeviceRef::Index(0));
        assert_eq!(cam0.rotate_angle, 90.0);
        assert!(cam0.is_convert_to_gray);
        assert_eq!(cam0.additional.get_int("gain", 0), 3);
        assert_eq!(cam0.detectors.len(), 2);

        let people = cam0.detector(1).unwrap();
        assert_eq!(people.kind, 1);
        assert_eq!((people.width, people.height, people.chnls), (640, 640, 3));

        let chained = cam0.detector(2).unwrap();
        assert_eq!(chained.kind, 7);
        assert_eq!(chained.predecessor_id(), Some(1));

        let cam1 = host.camera("cam1").unwrap();
        assert_eq!(cam1.device, DeviceRef::Path("rtsp://10.0.0.5/stream".to_string()));
        assert_eq!(cam1.mqtt_broker_port, 0);
    }

    #[test]
    fn test_rejects_wrong_version() {
        let mut doc = sample();
        doc["config_version_low"] = json!(9);
        match parse_document(&doc) {
            Err(Error::Config(msg)) => assert!(msg.contains("1.9")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_missing_settings() {
        let doc = json!({"config_version_high": 1, "config_version_low": 10});
        assert!(matches!(parse_document(&doc), Err(Error::Parse(_))));

        let doc = json!({"config_version_high": 1, "config_version_low": 10, "settings": []});
        assert!(matches!(parse_document(&doc), Err(Error::Parse(_))));

        assert!(matches!(parse_document(&json!([])), Err(Error::Parse(_))));
    }

    #[test]
    fn test_render_then_parse_keeps_host() {
        let host = parse_document(&sample()).unwrap();
        let doc = to_document(&host).unwrap();
        assert_eq!(doc["settings"]["cameras"][0]["detectors"][1]["predecessor"]["id"], 1);

        let again = parse_document(&doc).unwrap();
        assert_eq!(again, host);
    }

    #[test]
    fn test_gray_flag_rendered_as_int() {
        let host = parse_document(&sample()).unwrap();
        let doc = to_document(&host).unwrap();

        let cameras = &doc["settings"]["cameras"];
        assert!(cameras[0]["is_convert_to_gray"].is_i64());
        assert_eq!(cameras[0]["is_convert_to_gray"], 1);
        assert_eq!(cameras[1]["is_convert_to_gray"], 0);
        assert!(cameras[0]["is_flip"].is_boolean());
    }

    #[test]
    fn test_mask_secrets() {
        let mut doc = sample();
        let masked = mask_secrets(
            &mut doc,
            ["settings/mqtt_password", "settings/cameras[0]/video_stream_password"],
        );
        assert_eq!(masked, 1);
        assert_eq!(doc["settings"]["mqtt_password"], SECRET_MASK);
    }

    #[test]
    fn test_apply_values_respects_read_only() {
        let mut doc = sample();
        let values = vec![
            ItemValue::new("settings/name", json!("Line 2")),
            ItemValue::new("settings/id", json!("other")),
            ItemValue::new("settings/nope", json!(1)),
        ];
        let applied = apply_values(&mut doc, &values, &["settings/id".to_string()]);
        assert_eq!(applied, 1);
        assert_eq!(doc["settings"]["name"], "Line 2");
        assert_eq!(doc["settings"]["id"], "orin-01");
    }

    #[test]
    fn test_parse_dictionary() {
        let lines = parse_dictionary("settings/mqtt_password\n\n  settings/id  \n");
        assert_eq!(lines, vec!["settings/mqtt_password", "settings/id"]);
    }
}
