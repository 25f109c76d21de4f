//! ConfigStore Service
//!
//! Business rules for the fleet: id validation, uniqueness, detector
//! chaining, document import/export. Every mutation is load, modify, save
//! under one lock so concurrent requests never interleave.

use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use tokio::sync::Mutex;

use super::repository::FleetRepository;
use super::types::*;
use crate::device_command::ItemValue;
use crate::error::{Error, Result};
use crate::fleet::document::{apply_values, load_dictionary};
use crate::fleet::{mask_secrets, parse_document, to_document, Camera, Detector, Host};

const MAX_ID_LEN: usize = 64;

/// ConfigStore service for business logic
pub struct ConfigService {
    repo: FleetRepository,
    write_lock: Mutex<()>,
}

impl ConfigService {
    /// Create new service
    pub fn new(repo: FleetRepository) -> Self {
        Self {
            repo,
            write_lock: Mutex::new(()),
        }
    }

    pub fn repository(&self) -> &FleetRepository {
        &self.repo
    }

    async fn mutate<T>(&self, f: impl FnOnce(&mut Vec<Host>) -> Result<(T, bool)>) -> Result<T> {
        let _guard = self.write_lock.lock().await;
        let mut hosts = self.repo.load().await?;
        let (out, backup) = f(&mut hosts)?;
        self.repo.save(&hosts, backup).await?;
        Ok(out)
    }

    // ========================================
    // Host Operations
    // ========================================

    pub async fn list_hosts(&self) -> Result<Vec<Host>> {
        self.repo.load().await
    }

    pub async fn get_host(&self, host_id: &str) -> Result<Option<Host>> {
        Ok(self.repo.load().await?.into_iter().find(|h| h.id == host_id))
    }

    pub async fn create_host(&self, host: Host) -> Result<Host> {
        validate_id("host id", &host.id)?;
        validate_cameras(&host)?;

        self.mutate(|hosts| {
            if hosts.iter().any(|h| h.id == host.id) {
                return Err(Error::Conflict(format!("Host {} already exists", host.id)));
            }
            hosts.push(host.clone());
            Ok((host.clone(), host.is_create_backup))
        })
        .await
        .map(|host| {
            tracing::info!(host_id = %host.id, "Host created");
            host
        })
    }

    pub async fn update_host(&self, host_id: &str, req: UpdateHostRequest) -> Result<Host> {
        self.mutate(|hosts| {
            let host = find_host_mut(hosts, host_id)?;
            req.apply(host);
            Ok((host.clone(), host.is_create_backup))
        })
        .await
    }

    pub async fn delete_host(&self, host_id: &str) -> Result<Host> {
        self.mutate(|hosts| {
            let pos = hosts
                .iter()
                .position(|h| h.id == host_id)
                .ok_or_else(|| host_not_found(host_id))?;
            let removed = hosts.remove(pos);
            let backup = removed.is_create_backup;
            Ok((removed, backup))
        })
        .await
        .map(|host| {
            tracing::info!(host_id = %host.id, "Host deleted");
            host
        })
    }

    // ========================================
    // Camera Operations
    // ========================================

    pub async fn list_cameras(&self, host_id: &str) -> Result<Vec<Camera>> {
        Ok(self.require_host(host_id).await?.cameras)
    }

    pub async fn get_camera(&self, host_id: &str, camera_id: &str) -> Result<Option<Camera>> {
        Ok(self.require_host(host_id).await?.camera(camera_id).cloned())
    }

    pub async fn create_camera(&self, host_id: &str, camera: Camera) -> Result<Camera> {
        validate_id("camera id", &camera.id)?;
        validate_detectors(&camera)?;

        self.mutate(|hosts| {
            let host = find_host_mut(hosts, host_id)?;
            if host.camera(&camera.id).is_some() {
                return Err(Error::Conflict(format!(
                    "Camera {} already exists on host {}",
                    camera.id, host_id
                )));
            }
            host.cameras.push(camera.clone());
            Ok((camera, host.is_create_backup))
        })
        .await
    }

    pub async fn update_camera(
        &self,
        host_id: &str,
        camera_id: &str,
        req: UpdateCameraRequest,
    ) -> Result<Camera> {
        self.mutate(|hosts| {
            let host = find_host_mut(hosts, host_id)?;
            let backup = host.is_create_backup;
            let camera = find_camera_mut(host, camera_id)?;
            req.apply(camera);
            Ok((camera.clone(), backup))
        })
        .await
    }

    pub async fn delete_camera(&self, host_id: &str, camera_id: &str) -> Result<Camera> {
        self.mutate(|hosts| {
            let host = find_host_mut(hosts, host_id)?;
            let pos = host
                .cameras
                .iter()
                .position(|c| c.id == camera_id)
                .ok_or_else(|| camera_not_found(host_id, camera_id))?;
            Ok((host.cameras.remove(pos), host.is_create_backup))
        })
        .await
    }

    // ========================================
    // Detector Operations
    // ========================================

    pub async fn list_detectors(&self, host_id: &str, camera_id: &str) -> Result<Vec<Detector>> {
        let host = self.require_host(host_id).await?;
        host.camera(camera_id)
            .map(|c| c.detectors.clone())
            .ok_or_else(|| camera_not_found(host_id, camera_id))
    }

    pub async fn get_detector(
        &self,
        host_id: &str,
        camera_id: &str,
        detector_id: i32,
    ) -> Result<Option<Detector>> {
        let detectors = self.list_detectors(host_id, camera_id).await?;
        Ok(detectors.into_iter().find(|d| d.id == detector_id))
    }

    pub async fn create_detector(
        &self,
        host_id: &str,
        camera_id: &str,
        detector: Detector,
    ) -> Result<Detector> {
        if detector.id < 0 {
            return Err(Error::Validation("detector id must be >= 0".to_string()));
        }

        self.mutate(|hosts| {
            let host = find_host_mut(hosts, host_id)?;
            let backup = host.is_create_backup;
            let camera = find_camera_mut(host, camera_id)?;
            if camera.detector(detector.id).is_some() {
                return Err(Error::Conflict(format!(
                    "Detector {} already exists on camera {}",
                    detector.id, camera_id
                )));
            }
            camera.detectors.push(detector.clone());
            validate_detectors(camera)?;
            Ok((detector, backup))
        })
        .await
    }

    pub async fn update_detector(
        &self,
        host_id: &str,
        camera_id: &str,
        detector_id: i32,
        req: UpdateDetectorRequest,
    ) -> Result<Detector> {
        self.mutate(|hosts| {
            let host = find_host_mut(hosts, host_id)?;
            let backup = host.is_create_backup;
            let camera = find_camera_mut(host, camera_id)?;
            let detector = camera
                .detector_mut(detector_id)
                .ok_or_else(|| detector_not_found(camera_id, detector_id))?;
            req.apply(detector);
            let updated = detector.clone();
            validate_detectors(camera)?;
            Ok((updated, backup))
        })
        .await
    }

    pub async fn delete_detector(
        &self,
        host_id: &str,
        camera_id: &str,
        detector_id: i32,
    ) -> Result<Detector> {
        self.mutate(|hosts| {
            let host = find_host_mut(hosts, host_id)?;
            let backup = host.is_create_backup;
            let camera = find_camera_mut(host, camera_id)?;
            let pos = camera
                .detectors
                .iter()
                .position(|d| d.id == detector_id)
                .ok_or_else(|| detector_not_found(camera_id, detector_id))?;

            if let Some(dependent) = camera
                .detectors
                .iter()
                .find(|d| d.predecessor_id() == Some(detector_id))
            {
                return Err(Error::Conflict(format!(
                    "Detector {} is the predecessor of detector {}",
                    detector_id, dependent.id
                )));
            }
            Ok((camera.detectors.remove(pos), backup))
        })
        .await
    }

    // ========================================
    // Document Operations
    // ========================================

    /// Insert or replace a host from a device document
    ///
    /// Returns the host and whether an existing one was replaced.
    pub async fn import_document(&self, document: &Value) -> Result<(Host, bool)> {
        let host = parse_document(document)?;
        validate_id("host id", &host.id)?;
        validate_cameras(&host)?;

        let (host, replaced) = self
            .mutate(|hosts| {
                let replaced = match hosts.iter_mut().find(|h| h.id == host.id) {
                    Some(existing) => {
                        *existing = host.clone();
                        true
                    }
                    None => {
                        hosts.push(host.clone());
                        false
                    }
                };
                let backup = host.is_create_backup;
                Ok(((host, replaced), backup))
            })
            .await?;

        tracing::info!(host_id = %host.id, replaced = replaced, "Configuration document imported");
        Ok((host, replaced))
    }

    /// Render a host as a device document, optionally masking secrets
    pub async fn export_document(&self, host_id: &str, masked: bool) -> Result<Value> {
        let host = self.require_host(host_id).await?;
        let mut document = to_document(&host)?;

        if masked {
            let paths = secret_paths(&host)?;
            let count = mask_secrets(&mut document, paths.iter().map(String::as_str));
            tracing::debug!(host_id = %host_id, masked = count, "Secrets masked");
        }
        Ok(document)
    }

    /// Apply `path = value` edits to a host's document and store the result
    ///
    /// Paths in the host's read-only dictionary are skipped when the host
    /// has the read-only checker enabled. Returns the host and the number
    /// of values written.
    pub async fn apply_values(&self, host_id: &str, values: &[ItemValue]) -> Result<(Host, usize)> {
        let current = self.require_host(host_id).await?;
        let read_only = if current.is_use_readonly_checker
            && !current.readonly_checker_dictionary.is_empty()
        {
            read_dictionary(&current.readonly_checker_dictionary)?
        } else {
            Vec::new()
        };

        self.mutate(|hosts| {
            let host = find_host_mut(hosts, host_id)?;
            let mut document = to_document(host)?;
            let applied = apply_values(&mut document, values, &read_only);

            let mut updated = parse_document(&document)?;
            if updated.id != host_id {
                return Err(Error::Validation("host id can not be changed".to_string()));
            }
            validate_cameras(&updated)?;
            updated.config_version_high = host.config_version_high;
            updated.config_version_low = host.config_version_low;
            *host = updated;
            Ok(((host.clone(), applied), host.is_create_backup))
        })
        .await
    }

    /// Roll the fleet file back to its backup copy
    pub async fn restore_backup(&self) -> Result<Vec<Host>> {
        let _guard = self.write_lock.lock().await;
        self.repo.restore_backup().await
    }

    async fn require_host(&self, host_id: &str) -> Result<Host> {
        self.get_host(host_id)
            .await?
            .ok_or_else(|| host_not_found(host_id))
    }
}

fn host_not_found(host_id: &str) -> Error {
    Error::NotFound(format!("Host {} not found", host_id))
}

fn camera_not_found(host_id: &str, camera_id: &str) -> Error {
    Error::NotFound(format!("Camera {} not found on host {}", camera_id, host_id))
}

fn detector_not_found(camera_id: &str, detector_id: i32) -> Error {
    Error::NotFound(format!(
        "Detector {} not found on camera {}",
        detector_id, camera_id
    ))
}

fn find_host_mut<'a>(hosts: &'a mut [Host], host_id: &str) -> Result<&'a mut Host> {
    hosts
        .iter_mut()
        .find(|h| h.id == host_id)
        .ok_or_else(|| host_not_found(host_id))
}

fn find_camera_mut<'a>(host: &'a mut Host, camera_id: &str) -> Result<&'a mut Camera> {
    let host_id = host.id.clone();
    host.camera_mut(camera_id)
        .ok_or_else(|| camera_not_found(&host_id, camera_id))
}

fn validate_id(what: &str, id: &str) -> Result<()> {
    if id.is_empty() || id.chars().count() > MAX_ID_LEN {
        return Err(Error::Validation(format!(
            "{} must be 1-{} characters",
            what, MAX_ID_LEN
        )));
    }
    Ok(())
}

/// Camera ids unique within the host, each camera's detectors valid
fn validate_cameras(host: &Host) -> Result<()> {
    let mut seen = HashSet::new();
    for camera in &host.cameras {
        validate_id("camera id", &camera.id)?;
        if !seen.insert(camera.id.as_str()) {
            return Err(Error::Conflict(format!(
                "Duplicate camera id {} on host {}",
                camera.id, host.id
            )));
        }
        validate_detectors(camera)?;
    }
    Ok(())
}

/// Detector ids unique, predecessors exist and never form a cycle
fn validate_detectors(camera: &Camera) -> Result<()> {
    let mut seen = HashSet::new();
    for detector in &camera.detectors {
        if !seen.insert(detector.id) {
            return Err(Error::Conflict(format!(
                "Duplicate detector id {} on camera {}",
                detector.id, camera.id
            )));
        }
    }

    for detector in &camera.detectors {
        let mut visited = HashSet::from([detector.id]);
        let mut current = detector;
        while let Some(pred_id) = current.predecessor_id() {
            let pred = camera.detector(pred_id).ok_or_else(|| {
                Error::Validation(format!(
                    "Detector {} names unknown predecessor {}",
                    current.id, pred_id
                ))
            })?;
            if !visited.insert(pred_id) {
                return Err(Error::Validation(format!(
                    "Detector chain through {} forms a cycle",
                    detector.id
                )));
            }
            current = pred;
        }
    }
    Ok(())
}

/// Paths masked on export: the host's secrets dictionary, or the password fields
fn secret_paths(host: &Host) -> Result<Vec<String>> {
    if !host.secrets_dictionary.is_empty() {
        return read_dictionary(&host.secrets_dictionary);
    }

    let mut paths = vec!["settings/mqtt_password".to_string()];
    for i in 0..host.cameras.len() {
        paths.push(format!("settings/cameras[{}]/mqtt_password", i));
        paths.push(format!("settings/cameras[{}]/video_stream_password", i));
    }
    Ok(paths)
}

fn read_dictionary(path: &str) -> Result<Vec<String>> {
    load_dictionary(Path::new(path))
        .map_err(|e| Error::Config(format!("dictionary {}: {}", path, e)))
}
