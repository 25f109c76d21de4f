//! ConfigStore data types
//!
//! On-disk fleet file and the partial-update requests the API accepts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fleet::{Camera, Detector, DeviceRef, Host, HttpServerSettings, Predecessor};
use crate::json_fields::DynamicSettings;

/// Current fleet file layout
pub const FLEET_FILE_FORMAT: u32 = 1;

/// Fleet file contents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetFile {
    #[serde(default = "default_format")]
    pub format: u32,
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub hosts: Vec<Host>,
}

fn default_format() -> u32 {
    FLEET_FILE_FORMAT
}

impl FleetFile {
    pub fn new(hosts: Vec<Host>) -> Self {
        Self {
            format: FLEET_FILE_FORMAT,
            saved_at: Some(Utc::now()),
            hosts,
        }
    }
}

/// Copy every `Some` field of a request onto the target
macro_rules! apply_fields {
    ($req:expr, $target:expr, [$($field:ident),* $(,)?]) => {
        $(
            if let Some(v) = &$req.$field {
                $target.$field = v.clone();
            }
        )*
    };
}

/// Update host request (id is immutable)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateHostRequest {
    pub name: Option<String>,
    pub device_kind: Option<i32>,
    pub mqtt_client_name: Option<String>,
    pub mqtt_broker_ip: Option<String>,
    pub mqtt_broker_port: Option<u16>,
    pub mqtt_connection_type: Option<i32>,
    pub mqtt_login: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_tls_cert_file: Option<String>,
    pub mqtt_command_topic: Option<String>,
    pub mqtt_response_topic: Option<String>,
    pub mqtt_settings_get_topic: Option<String>,
    pub mqtt_settings_set_topic: Option<String>,
    pub mqtt_error_topic: Option<String>,
    pub mqtt_ping_topic: Option<String>,
    pub mqtt_ping_interval: Option<i32>,
    pub is_use_readonly_checker: Option<bool>,
    pub readonly_checker_dictionary: Option<String>,
    pub secrets_dictionary: Option<String>,
    pub settings_backup_path: Option<String>,
    pub is_create_backup: Option<bool>,
    pub http_server: Option<HttpServerSettings>,
}

impl UpdateHostRequest {
    pub fn apply(&self, host: &mut Host) {
        apply_fields!(self, host, [
            name, device_kind,
            mqtt_client_name, mqtt_broker_ip, mqtt_broker_port, mqtt_connection_type,
            mqtt_login, mqtt_password, mqtt_tls_cert_file,
            mqtt_command_topic, mqtt_response_topic, mqtt_settings_get_topic,
            mqtt_settings_set_topic, mqtt_error_topic, mqtt_ping_topic, mqtt_ping_interval,
            is_use_readonly_checker, readonly_checker_dictionary, secrets_dictionary,
            settings_backup_path, is_create_backup,
        ]);
        if let Some(http) = &self.http_server {
            host.http_server = Some(http.clone());
        }
    }
}

/// Update camera request (id is immutable)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateCameraRequest {
    pub name: Option<String>,
    pub device: Option<DeviceRef>,
    pub connection_attempts_count: Option<i32>,
    pub is_display: Option<bool>,
    pub is_use_gpu: Option<bool>,
    pub is_flip: Option<bool>,
    pub is_convert_to_gray: Option<bool>,
    pub is_show_mask: Option<bool>,
    pub is_sort_results: Option<bool>,
    pub rotate_angle: Option<f64>,
    pub frame_width: Option<i32>,
    pub frame_height: Option<i32>,
    pub resize_x: Option<i32>,
    pub resize_y: Option<i32>,
    pub object_detector_kind: Option<i32>,
    pub mqtt_client_name: Option<String>,
    pub mqtt_broker_ip: Option<String>,
    pub mqtt_broker_port: Option<u16>,
    pub mqtt_connection_type: Option<i32>,
    pub mqtt_login: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_tls_cert_file: Option<String>,
    pub mqtt_detection_topic: Option<String>,
    pub mqtt_error_topic: Option<String>,
    pub mqtt_ping_topic: Option<String>,
    pub mqtt_ping_interval: Option<i32>,
    pub mqtt_is_send_empty: Option<bool>,
    pub video_stream_port: Option<u16>,
    pub video_stream_channel: Option<String>,
    pub video_stream_login: Option<String>,
    pub video_stream_password: Option<String>,
    pub video_stream_mode: Option<i32>,
    pub video_stream_engine: Option<i32>,
    pub video_stream_max_output_fps: Option<u32>,
    pub is_use_super_resolution: Option<bool>,
    pub super_resolution_name: Option<String>,
    pub super_resolution_model_path: Option<String>,
    pub super_resolution_factor: Option<i32>,
    pub on_preprocess: Option<String>,
    pub on_postprocess: Option<String>,
    pub execute_always: Option<bool>,
    pub execute_mode: Option<i32>,
    pub input_kind: Option<i32>,
    pub output_kind: Option<i32>,
    pub background_color: Option<String>,
    pub aliases_path: Option<String>,
    pub additional: Option<DynamicSettings>,
}

impl UpdateCameraRequest {
    pub fn apply(&self, camera: &mut Camera) {
        apply_fields!(self, camera, [
            name, device, connection_attempts_count,
            is_display, is_use_gpu, is_flip, is_convert_to_gray, is_show_mask, is_sort_results,
            rotate_angle, frame_width, frame_height, resize_x, resize_y, object_detector_kind,
            mqtt_client_name, mqtt_broker_ip, mqtt_broker_port, mqtt_connection_type,
            mqtt_login, mqtt_password, mqtt_tls_cert_file,
            mqtt_detection_topic, mqtt_error_topic, mqtt_ping_topic, mqtt_ping_interval,
            mqtt_is_send_empty,
            video_stream_port, video_stream_channel, video_stream_login, video_stream_password,
            video_stream_mode, video_stream_engine, video_stream_max_output_fps,
            is_use_super_resolution, super_resolution_name, super_resolution_model_path,
            super_resolution_factor,
            on_preprocess, on_postprocess, execute_always, execute_mode,
            input_kind, output_kind, background_color, aliases_path, additional,
        ]);
    }
}

/// Update detector request (id is immutable)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateDetectorRequest {
    pub name: Option<String>,
    pub kind: Option<i32>,
    pub neural_network_id: Option<i32>,
    /// Use `{"id": -1, "class": -1}` to unchain
    pub predecessor: Option<Predecessor>,
    pub input_tensor_name: Option<String>,
    pub output_tensor_name: Option<String>,
    pub model_path: Option<String>,
    pub labels_path: Option<String>,
    pub rules_path: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub chnls: Option<i32>,
    pub is_use_gpu: Option<bool>,
    pub is_send_results: Option<bool>,
    pub is_draw_detections: Option<bool>,
    pub results_mapping_rule: Option<i32>,
    pub color: Option<String>,
    pub on_detect: Option<String>,
    pub execute_always: Option<bool>,
    pub execute_mode: Option<i32>,
    pub additional: Option<DynamicSettings>,
}

impl UpdateDetectorRequest {
    pub fn apply(&self, detector: &mut Detector) {
        apply_fields!(self, detector, [
            name, kind, neural_network_id, input_tensor_name, output_tensor_name,
            model_path, labels_path, rules_path, width, height, chnls,
            is_use_gpu, is_send_results, is_draw_detections, results_mapping_rule,
            color, on_detect, execute_always, execute_mode, additional,
        ]);
        if let Some(p) = &self.predecessor {
            detector.predecessor = Some(*p);
        }
    }
}

/// Summary row for host listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSummary {
    pub id: String,
    pub name: String,
    pub mqtt_broker_ip: String,
    pub camera_count: usize,
    pub detector_count: usize,
}

impl From<&Host> for HostSummary {
    fn from(host: &Host) -> Self {
        Self {
            id: host.id.clone(),
            name: host.name.clone(),
            mqtt_broker_ip: host.mqtt_broker_ip.clone(),
            camera_count: host.cameras.len(),
            detector_count: host.cameras.iter().map(|c| c.detectors.len()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_partial_host_update() {
        let mut host = Host {
            id: "orin-01".to_string(),
            name: "old".to_string(),
            mqtt_broker_port: 1883,
            ..Host::default()
        };
        let req: UpdateHostRequest =
            serde_json::from_value(json!({"name": "Line 2", "is_create_backup": false})).unwrap();
        req.apply(&mut host);

        assert_eq!(host.name, "Line 2");
        assert!(!host.is_create_backup);
        assert_eq!(host.mqtt_broker_port, 1883);
    }

    #[test]
    fn test_detector_unchain() {
        let mut detector = Detector {
            predecessor: Some(Predecessor { class: 0, id: 1 }),
            ..Detector::default()
        };
        let req: UpdateDetectorRequest =
            serde_json::from_value(json!({"predecessor": {"class": -1, "id": -1}})).unwrap();
        req.apply(&mut detector);
        assert_eq!(detector.predecessor_id(), None);
    }

    #[test]
    fn test_camera_update_device() {
        let mut camera = Camera::default();
        let req: UpdateCameraRequest =
            serde_json::from_value(json!({"device": "rtsp://10.0.0.5/stream", "frame_width": 1920}))
                .unwrap();
        req.apply(&mut camera);
        assert_eq!(camera.device, DeviceRef::Path("rtsp://10.0.0.5/stream".to_string()));
        assert_eq!(camera.frame_width, 1920);
    }
}
