//! Fleet configuration records
//!
//! Field names match the device configuration files, so these types
//! serialize straight into the camera/detector layout devices read.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::json_fields::DynamicSettings;

/// Document version the fleet tooling reads and writes
pub const SUPPORTED_CONFIG_VERSION: ConfigVersion = ConfigVersion { high: 1, low: 10 };

/// Configuration document version (`config_version_high.config_version_low`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ConfigVersion {
    pub high: i32,
    pub low: i32,
}

impl ConfigVersion {
    pub fn new(high: i32, low: i32) -> Self {
        Self { high, low }
    }

    pub fn is_supported(&self) -> bool {
        *self == SUPPORTED_CONFIG_VERSION
    }
}

impl PartialOrd for ConfigVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ConfigVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.high
            .cmp(&other.high)
            .then_with(|| self.low.cmp(&other.low))
    }
}

impl fmt::Display for ConfigVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.high, self.low)
    }
}

/// Capture device: a local device index or a path/URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceRef {
    Index(u32),
    Path(String),
}

impl Default for DeviceRef {
    fn default() -> Self {
        Self::Path(String::new())
    }
}

/// Detector chaining: run on the results of another detector
///
/// `id == -1` means the detector runs on the original frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predecessor {
    pub class: i32,
    pub id: i32,
}

impl Default for Predecessor {
    fn default() -> Self {
        Self { class: -1, id: -1 }
    }
}

impl Predecessor {
    pub fn is_chained(&self) -> bool {
        self.id >= 0
    }
}

/// Inference unit attached to a camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Detector {
    pub id: i32,
    pub name: String,
    pub kind: i32,
    pub neural_network_id: i32,
    pub predecessor: Option<Predecessor>,
    pub input_tensor_name: String,
    pub output_tensor_name: String,
    pub model_path: String,
    pub labels_path: String,
    pub rules_path: String,
    pub width: i32,
    pub height: i32,
    pub chnls: i32,
    pub is_use_gpu: bool,
    pub is_send_results: bool,
    pub is_draw_detections: bool,
    pub results_mapping_rule: i32,
    /// `0xAARRGGBB` hex string
    pub color: String,
    pub on_detect: String,
    pub execute_always: bool,
    pub execute_mode: i32,
    #[serde(skip_serializing_if = "DynamicSettings::is_empty")]
    pub additional: DynamicSettings,
}

impl Default for Detector {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            kind: -1,
            neural_network_id: 0,
            predecessor: None,
            input_tensor_name: String::new(),
            output_tensor_name: String::new(),
            model_path: String::new(),
            labels_path: String::new(),
            rules_path: String::new(),
            width: 0,
            height: 0,
            chnls: 0,
            is_use_gpu: false,
            is_send_results: false,
            is_draw_detections: false,
            results_mapping_rule: 0,
            color: "0x00FFFFFF".to_string(),
            on_detect: String::new(),
            execute_always: false,
            execute_mode: 0,
            additional: DynamicSettings::default(),
        }
    }
}

impl Detector {
    /// Id of the detector this one is chained to, if any
    pub fn predecessor_id(&self) -> Option<i32> {
        self.predecessor
            .filter(Predecessor::is_chained)
            .map(|p| p.id)
    }
}

/// Video source attached to a host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Camera {
    pub id: String,
    pub name: String,
    pub device: DeviceRef,
    pub connection_attempts_count: i32,
    pub is_display: bool,
    pub is_use_gpu: bool,
    pub is_flip: bool,
    pub is_convert_to_gray: bool,
    pub is_show_mask: bool,
    pub is_sort_results: bool,
    pub rotate_angle: f64,
    pub frame_width: i32,
    pub frame_height: i32,
    pub resize_x: i32,
    pub resize_y: i32,
    pub object_detector_kind: i32,

    pub mqtt_client_name: String,
    pub mqtt_broker_ip: String,
    pub mqtt_broker_port: u16,
    pub mqtt_connection_type: i32,
    pub mqtt_login: String,
    pub mqtt_password: String,
    pub mqtt_tls_cert_file: String,
    pub mqtt_detection_topic: String,
    pub mqtt_error_topic: String,
    pub mqtt_ping_topic: String,
    pub mqtt_ping_interval: i32,
    pub mqtt_is_send_empty: bool,

    pub video_stream_port: u16,
    pub video_stream_channel: String,
    pub video_stream_login: String,
    pub video_stream_password: String,
    pub video_stream_mode: i32,
    pub video_stream_engine: i32,
    pub video_stream_max_output_fps: u32,

    pub is_use_super_resolution: bool,
    pub super_resolution_name: String,
    pub super_resolution_model_path: String,
    pub super_resolution_factor: i32,

    pub on_preprocess: String,
    pub on_postprocess: String,
    pub execute_always: bool,
    pub execute_mode: i32,

    pub input_kind: i32,
    pub output_kind: i32,
    pub background_color: String,
    pub aliases_path: String,

    #[serde(skip_serializing_if = "DynamicSettings::is_empty")]
    pub additional: DynamicSettings,
    pub detectors: Vec<Detector>,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            device: DeviceRef::default(),
            connection_attempts_count: 1,
            is_display: false,
            is_use_gpu: false,
            is_flip: false,
            is_convert_to_gray: false,
            is_show_mask: false,
            is_sort_results: false,
            rotate_angle: 0.0,
            frame_width: 0,
            frame_height: 0,
            resize_x: 0,
            resize_y: 0,
            object_detector_kind: 0,
            mqtt_client_name: String::new(),
            mqtt_broker_ip: String::new(),
            mqtt_broker_port: 0,
            mqtt_connection_type: 0,
            mqtt_login: String::new(),
            mqtt_password: String::new(),
            mqtt_tls_cert_file: String::new(),
            mqtt_detection_topic: String::new(),
            mqtt_error_topic: String::new(),
            mqtt_ping_topic: String::new(),
            mqtt_ping_interval: 0,
            mqtt_is_send_empty: false,
            video_stream_port: 0,
            video_stream_channel: String::new(),
            video_stream_login: String::new(),
            video_stream_password: String::new(),
            video_stream_mode: 0,
            video_stream_engine: 0,
            video_stream_max_output_fps: 0,
            is_use_super_resolution: false,
            super_resolution_name: String::new(),
            super_resolution_model_path: String::new(),
            super_resolution_factor: 1,
            on_preprocess: String::new(),
            on_postprocess: String::new(),
            execute_always: false,
            execute_mode: 0,
            input_kind: 0,
            output_kind: 0,
            background_color: "0x00FFFFFF".to_string(),
            aliases_path: String::new(),
            additional: DynamicSettings::default(),
            detectors: Vec::new(),
        }
    }
}

impl Camera {
    pub fn detector(&self, id: i32) -> Option<&Detector> {
        self.detectors.iter().find(|d| d.id == id)
    }

    pub fn detector_mut(&mut self, id: i32) -> Option<&mut Detector> {
        self.detectors.iter_mut().find(|d| d.id == id)
    }

    /// URL of the camera's HTTP video stream on `host_ip`
    ///
    /// `None` when the camera does not publish a stream.
    pub fn stream_url(&self, host_ip: &str) -> Option<String> {
        if self.video_stream_port == 0 || host_ip.is_empty() {
            return None;
        }
        let channel = self.video_stream_channel.trim_start_matches('/');
        Some(format!(
            "http://{}:{}/{}",
            host_ip, self.video_stream_port, channel
        ))
    }
}

/// Embedded web server settings of a host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpServerSettings {
    pub device_name: String,
    pub root_dir: String,
    pub http_port: u16,
    pub https_port: u16,
    pub cert_dir: String,
    pub home_page: String,
}

/// Physical device hosting cameras
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Host {
    pub id: String,
    pub name: String,
    pub device_kind: i32,
    pub config_version_high: i32,
    pub config_version_low: i32,

    pub mqtt_client_name: String,
    pub mqtt_broker_ip: String,
    pub mqtt_broker_port: u16,
    pub mqtt_connection_type: i32,
    pub mqtt_login: String,
    pub mqtt_password: String,
    pub mqtt_tls_cert_file: String,
    pub mqtt_command_topic: String,
    pub mqtt_response_topic: String,
    pub mqtt_settings_get_topic: String,
    pub mqtt_settings_set_topic: String,
    pub mqtt_error_topic: String,
    pub mqtt_ping_topic: String,
    pub mqtt_ping_interval: i32,

    pub is_use_readonly_checker: bool,
    pub readonly_checker_dictionary: String,
    pub secrets_dictionary: String,
    pub settings_backup_path: String,
    pub is_create_backup: bool,

    pub http_server: Option<HttpServerSettings>,
    pub cameras: Vec<Camera>,
}

impl Default for Host {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            device_kind: 0,
            config_version_high: SUPPORTED_CONFIG_VERSION.high,
            config_version_low: SUPPORTED_CONFIG_VERSION.low,
            mqtt_client_name: String::new(),
            mqtt_broker_ip: String::new(),
            mqtt_broker_port: 0,
            mqtt_connection_type: 0,
            mqtt_login: String::new(),
            mqtt_password: String::new(),
            mqtt_tls_cert_file: String::new(),
            mqtt_command_topic: String::new(),
            mqtt_response_topic: String::new(),
            mqtt_settings_get_topic: String::new(),
            mqtt_settings_set_topic: String::new(),
            mqtt_error_topic: String::new(),
            mqtt_ping_topic: String::new(),
            mqtt_ping_interval: 0,
            is_use_readonly_checker: false,
            readonly_checker_dictionary: String::new(),
            secrets_dictionary: String::new(),
            settings_backup_path: String::new(),
            is_create_backup: true,
            http_server: None,
            cameras: Vec::new(),
        }
    }
}

impl Host {
    pub fn config_version(&self) -> ConfigVersion {
        ConfigVersion::new(self.config_version_high, self.config_version_low)
    }

    pub fn camera(&self, id: &str) -> Option<&Camera> {
        self.cameras.iter().find(|c| c.id == id)
    }

    pub fn camera_mut(&mut self, id: &str) -> Option<&mut Camera> {
        self.cameras.iter_mut().find(|c| c.id == id)
    }

    /// Topics on which the host reports back to the studio
    pub fn reply_topics(&self) -> impl Iterator<Item = &str> {
        [
            self.mqtt_response_topic.as_str(),
            self.mqtt_ping_topic.as_str(),
            self.mqtt_error_topic.as_str(),
            self.mqtt_settings_get_topic.as_str(),
        ]
        .into_iter()
        .filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_version_ordering() {
        assert!(ConfigVersion::new(1, 10) > ConfigVersion::new(1, 9));
        assert!(ConfigVersion::new(2, 0) > ConfigVersion::new(1, 99));
        assert_eq!(ConfigVersion::new(1, 10).to_string(), "1.10");
        assert!(Host::default().config_version().is_supported());
    }

    #[test]
    fn test_predecessor_chaining() {
        let mut detector = Detector::default();
        assert_eq!(detector.predecessor_id(), None);
        detector.predecessor = Some(Predecessor::default());
        assert_eq!(detector.predecessor_id(), None);
        detector.predecessor = Some(Predecessor { class: 0, id: 2 });
        assert_eq!(detector.predecessor_id(), Some(2));
    }

    #[test]
    fn test_stream_url() {
        let mut camera = Camera::default();
        assert_eq!(camera.stream_url("192.168.0.140"), None);

        camera.video_stream_port = 8088;
        camera.video_stream_channel = "/camera1".to_string();
        assert_eq!(
            camera.stream_url("192.168.0.140").as_deref(),
            Some("http://192.168.0.140:8088/camera1")
        );
        assert_eq!(camera.stream_url(""), None);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let camera: Camera = serde_json::from_value(json!({
            "id": "cam1",
            "device": 0,
            "detectors": [{"id": 1, "name": "yolo"}]
        }))
        .unwrap();

        assert_eq!(camera.device, DeviceRef::Index(0));
        assert_eq!(camera.connection_attempts_count, 1);
        assert_eq!(camera.detectors[0].color, "0x00FFFFFF");
        assert_eq!(camera.detector(1).map(|d| d.name.as_str()), Some("yolo"));
    }

    #[test]
    fn test_reply_topics_skip_empty() {
        let host = Host {
            mqtt_response_topic: "cs/response".to_string(),
            mqtt_ping_topic: "cs/ping".to_string(),
            ..Host::default()
        };
        let topics: Vec<&str> = host.reply_topics().collect();
        assert_eq!(topics, vec!["cs/response", "cs/ping"]);
    }
}
