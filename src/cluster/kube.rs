use crate::cluster::{Cluster, ClusterError, LogStream, WorkerHandle};
use crate::config::types::ClusterConfig;
use crate::source::record::WorkerInfo;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::Deserialize;
use std::io;
use tokio_util::io::StreamReader;

/// Kubernetes REST API client, reading pods and their logs.
#[derive(Debug)]
pub struct KubeCluster {
    base_url: String,
    client: reqwest::Client,
}

impl KubeCluster {
    pub fn new(config: &ClusterConfig) -> Result<Self, ClusterError> {
        let mut headers = HeaderMap::new();
        if let Some(token_file) = &config.token_file {
            let token = std::fs::read_to_string(token_file)?;
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                .map_err(|e| ClusterError::InvalidToken(e.to_string()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(config.insecure);
        if let Some(ca_file) = &config.ca_file {
            let pem = std::fs::read(ca_file)?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
        }

        Ok(Self {
            base_url: config.api_server.trim_end_matches('/').to_string(),
            client: builder.build()?,
        })
    }

    async fn error_from(response: reqwest::Response) -> ClusterError {
        ClusterError::Api {
            status: response.status().as_u16(),
            message: response.text().await.unwrap_or_default(),
        }
    }
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn list_workers(&self, namespace: &str) -> Result<Vec<WorkerHandle>, ClusterError> {
        let url = format!("{}/api/v1/namespaces/{}/pods", self.base_url, namespace);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        let body = response.bytes().await?;
        parse_pod_list(&body, namespace)
    }

    async fn stream_log(&self, worker: &WorkerHandle) -> Result<LogStream, ClusterError> {
        let url = format!(
            "{}/api/v1/namespaces/{}/pods/{}/log?follow=true",
            self.base_url,
            worker.namespace,
            worker.name()
        );
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if status == StatusCode::BAD_REQUEST {
            // The API answers 400 while the container is still being created
            return Err(ClusterError::NotReady(
                response.text().await.unwrap_or_default(),
            ));
        }
        if !status.is_success() {
            return Err(Self::error_from(response).await);
        }

        let bytes = response
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
        Ok(Box::pin(StreamReader::new(bytes)))
    }
}

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    metadata: PodMetadata,
    #[serde(default)]
    status: Option<PodStatus>,
}

#[derive(Debug, Deserialize)]
struct PodMetadata {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodStatus {
    #[serde(default)]
    start_time: Option<DateTime<Utc>>,
}

/// Workers of a `PodList` response. Pods without a start time have not been
/// scheduled yet and are left out.
fn parse_pod_list(body: &[u8], namespace: &str) -> Result<Vec<WorkerHandle>, ClusterError> {
    let list: PodList = serde_json::from_slice(body)?;
    Ok(list
        .items
        .into_iter()
        .filter_map(|pod| {
            let started_at = pod.status?.start_time?;
            Some(WorkerHandle::new(
                WorkerInfo::new(pod.metadata.name, started_at),
                namespace,
            ))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_pod_list() {
        let body = br#"{
            "kind": "PodList",
            "apiVersion": "v1",
            "items": [
                {
                    "metadata": {"name": "front-0", "namespace": "prod", "uid": "1"},
                    "status": {"phase": "Running", "startTime": "2024-01-01T00:00:00Z"}
                },
                {
                    "metadata": {"name": "pending-0"},
                    "status": {"phase": "Pending"}
                },
                {
                    "metadata": {"name": "bare-0"}
                }
            ]
        }"#;

        let workers = parse_pod_list(body, "prod").unwrap();
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].name(), "front-0");
        assert_eq!(workers[0].namespace, "prod");
        assert_eq!(
            workers[0].info.started_at,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(workers[0].run_id(), "front-0=2024-01-01T00:00:00Z");
    }

    #[test]
    fn test_parse_empty_list() {
        assert!(parse_pod_list(br#"{"kind":"PodList"}"#, "default")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(matches!(
            parse_pod_list(b"<html>", "default"),
            Err(ClusterError::Json(_))
        ));
    }

    #[test]
    fn test_new_reads_token_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let token = dir.path().join("token");
        std::fs::write(&token, "secret\n").unwrap();

        let config = ClusterConfig {
            api_server: "https://kube.local:6443/".to_string(),
            token_file: Some(token),
            ..ClusterConfig::default()
        };
        let cluster = KubeCluster::new(&config).unwrap();
        assert_eq!(cluster.base_url, "https://kube.local:6443");
    }

    #[test]
    fn test_new_fails_on_missing_token_file() {
        let config = ClusterConfig {
            api_server: "https://kube.local".to_string(),
            token_file: Some("/nonexistent/token".into()),
            ..ClusterConfig::default()
        };
        assert!(matches!(KubeCluster::new(&config), Err(ClusterError::Io(_))));
    }
}
