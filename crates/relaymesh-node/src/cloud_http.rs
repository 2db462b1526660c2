// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTPS `CloudQueue` (§4.9, §6.4): a PostgREST-shaped REST client over the
//! `relay_commands` table, authenticated with a bearer token and an
//! `apikey` header.
//!
//! TLS verification defaults to off, matching the legacy behavior the spec
//! documents as an open question (§9); `--verify-tls` opts a deployment
//! into the platform trust store instead of pinning anything client-side.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use relaymesh::bridge::{CloudQueue, Row, RowStatus};
use relaymesh::error::{CloudError, Error, Result};

const TABLE: &str = "relay_commands";

/// A `relay_commands` row as it appears on the wire.
#[derive(Debug, Deserialize)]
struct CloudRow {
    id: i64,
    relay_number: u8,
    action: String,
    duration_seconds: u32,
    status: String,
    error_message: Option<String>,
}

impl From<CloudRow> for Row {
    fn from(r: CloudRow) -> Self {
        let status = match r.status.as_str() {
            "Sent" => RowStatus::Sent,
            "Completed" => RowStatus::Completed,
            "Failed" => RowStatus::Failed,
            _ => RowStatus::Pending,
        };
        Row {
            id: r.id,
            relay: r.relay_number,
            action: r.action,
            duration_s: r.duration_seconds,
            status,
            error: r.error_message,
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusPatch<'a> {
    status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<&'a str>,
}

/// Talks to a hosted `relay_commands` table over HTTPS.
pub struct CloudHttpClient {
    client: reqwest::Client,
    base_url: String,
    bearer_token: String,
    api_key: String,
}

impl CloudHttpClient {
    /// Build a client against `base_url` (no trailing slash). `verify_tls`
    /// controls whether certificate validation is enforced.
    pub fn new(base_url: impl Into<String>, bearer_token: impl Into<String>, api_key: impl Into<String>, verify_tls: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!verify_tls)
            .build()
            .map_err(|e| Error::Cloud(CloudError::Transport(e.to_string())))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            bearer_token: bearer_token.into(),
            api_key: api_key.into(),
        })
    }

    fn table_url(&self) -> String {
        format!("{}/{}", self.base_url, TABLE)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .bearer_auth(&self.bearer_token)
            .header("apikey", &self.api_key)
    }

    async fn patch_status(&self, row_id: i64, status: &str, error_message: Option<&str>) -> Result<()> {
        let url = format!("{}?id=eq.{row_id}", self.table_url());
        let body = StatusPatch { status, error_message };
        let resp = self
            .authed(self.client.patch(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Cloud(CloudError::Transport(e.to_string())))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Error::Cloud(CloudError::HttpStatus(resp.status().as_u16())))
        }
    }
}

#[async_trait]
impl CloudQueue for CloudHttpClient {
    async fn list_pending(&self, device_id: &str, max: usize) -> Result<Vec<Row>> {
        let url = format!(
            "{}?device_id=eq.{device_id}&status=eq.Pending&order=created_at.asc&limit={max}",
            self.table_url()
        );
        let resp = self
            .authed(self.client.get(&url))
            .send()
            .await
            .map_err(|e| Error::Cloud(CloudError::Transport(e.to_string())))?;
        if !resp.status().is_success() {
            return Err(Error::Cloud(CloudError::HttpStatus(resp.status().as_u16())));
        }
        let rows: Vec<CloudRow> = resp
            .json()
            .await
            .map_err(|e| Error::Cloud(CloudError::Decode(e.to_string())))?;
        Ok(rows.into_iter().map(Row::from).collect())
    }

    async fn mark_sent(&self, row_id: i64) -> Result<()> {
        self.patch_status(row_id, "Sent", None).await
    }

    async fn mark_completed(&self, row_id: i64) -> Result<()> {
        self.patch_status(row_id, "Completed", None).await
    }

    async fn mark_failed(&self, row_id: i64, reason: &str) -> Result<()> {
        self.patch_status(row_id, "Failed", Some(reason)).await
    }
}
