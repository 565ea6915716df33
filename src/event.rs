use anyhow::Context as _;
use base64::Engine as _;

/// Events retried more often than this are assumed to be duplicate work from
/// a retry storm and are dropped before any processing.
pub const MAX_DELIVERY_ATTEMPTS: u32 = 2;

/// One inbound storage notification, already validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestEvent {
    pub bucket: String,
    /// Full object path: `{workspace_id}/{project_id}/.../{filename}`.
    pub object_path: String,
    pub workspace_id: String,
    pub project_id: String,
    /// Path remainder after workspace and project segments.
    pub filename: String,
    pub delivery_attempt: u32,
    /// Explicit taxonomy subset for a custom classification run; empty for a
    /// default run.
    pub risk_type_ids: Vec<i64>,
}

impl IngestEvent {
    /// Builds an event directly from a bucket and object path, bypassing the
    /// push envelope. Used by one-shot command-line runs.
    pub fn from_object_path(
        bucket: &str,
        object_path: &str,
        risk_type_ids: Vec<i64>,
    ) -> anyhow::Result<Self> {
        let parts = object_path.split('/').collect::<Vec<_>>();
        if parts.len() < 3 {
            anyhow::bail!("object path must have at least 3 segments: {object_path}");
        }
        let filename = parts[2..].join("/");
        if !filename.to_ascii_lowercase().ends_with(".pdf") {
            anyhow::bail!("object is not a PDF: {filename}");
        }
        Ok(Self {
            bucket: bucket.to_owned(),
            object_path: object_path.to_owned(),
            workspace_id: parts[0].to_owned(),
            project_id: parts[1].to_owned(),
            filename,
            delivery_attempt: 1,
            risk_type_ids,
        })
    }

    /// File name without directories or the `.pdf` extension; keys every
    /// published artifact.
    pub fn basename(&self) -> &str {
        let name = self
            .filename
            .rsplit('/')
            .next()
            .unwrap_or(self.filename.as_str());
        name.strip_suffix(".pdf")
            .or_else(|| name.strip_suffix(".PDF"))
            .unwrap_or(name)
    }
}

/// Outcome of envelope parsing. Malformed envelopes are `Err`; envelopes that
/// are valid but carry nothing to process are acknowledged and ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventDecision {
    Process(IngestEvent),
    Ignore { reason: String },
}

/// Parses a push envelope: `{"message": {"data": base64, "attributes": {…}},
/// "deliveryAttempt": n}` where the decoded data is a storage object
/// notification `{id, name, bucket, contentType, size}`.
pub fn parse_push_envelope(envelope: &serde_json::Value) -> anyhow::Result<EventDecision> {
    let message = envelope
        .get("message")
        .and_then(|v| v.as_object())
        .ok_or_else(|| anyhow::anyhow!("missing `message` object in envelope"))?;

    let data = message
        .get("data")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("message data must be a base64 string"))?;

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(data)
        .context("decode message data base64")?;
    let decoded = String::from_utf8(decoded).context("message data is not valid UTF-8")?;
    if decoded.trim().is_empty() {
        return Ok(EventDecision::Ignore {
            reason: "empty message".to_owned(),
        });
    }

    let storage_object: serde_json::Value =
        serde_json::from_str(&decoded).context("parse storage object json")?;
    if storage_object.get("id").and_then(|v| v.as_str()).is_none() {
        anyhow::bail!("storage object has no `id`");
    }

    let object_name = storage_object
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("storage object has no `name`"))?
        .to_owned();
    let object_bucket = storage_object
        .get("bucket")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_owned();

    let attributes = message.get("attributes").and_then(|v| v.as_object());
    let attr = |key: &str| {
        attributes
            .and_then(|a| a.get(key))
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    // Compared at full width: narrowing first would let 2^32 + 1 masquerade
    // as a first attempt.
    let delivery_attempt = envelope
        .get("deliveryAttempt")
        .and_then(|v| v.as_u64())
        .unwrap_or(1);
    if delivery_attempt > u64::from(MAX_DELIVERY_ATTEMPTS) {
        return Ok(EventDecision::Ignore {
            reason: format!("delivery attempt {delivery_attempt} exceeds ceiling"),
        });
    }
    let delivery_attempt = delivery_attempt as u32;

    let parts = object_name.split('/').collect::<Vec<_>>();
    if parts.len() < 3 {
        anyhow::bail!("object name must have at least 3 segments: {object_name}");
    }
    let workspace_id = attr("workspaceId")
        .map(str::to_owned)
        .unwrap_or_else(|| parts[0].to_owned());
    let project_id = parts[1].to_owned();
    let filename = parts[2..].join("/");

    if !filename.to_ascii_lowercase().ends_with(".pdf") {
        return Ok(EventDecision::Ignore {
            reason: format!("not a PDF: {filename}"),
        });
    }

    let bucket = attr("bucket").map(str::to_owned).unwrap_or(object_bucket);
    if bucket.is_empty() {
        anyhow::bail!("storage object has no bucket and no bucket attribute");
    }

    let risk_type_ids = attr("riskTypeIds")
        .map(parse_risk_type_ids)
        .unwrap_or_default();

    Ok(EventDecision::Process(IngestEvent {
        bucket,
        object_path: object_name,
        workspace_id,
        project_id,
        filename,
        delivery_attempt,
        risk_type_ids,
    }))
}

fn parse_risk_type_ids(raw: &str) -> Vec<i64> {
    let mut ids = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.parse::<i64>() {
            Ok(id) => ids.push(id),
            Err(_) => {
                tracing::warn!(value = part, "ignoring non-numeric risk type id");
            }
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    fn envelope(name: &str, extra: serde_json::Value) -> serde_json::Value {
        let object = serde_json::json!({
            "id": format!("bucket/{name}/123"),
            "name": name,
            "bucket": "contracts-prod",
            "contentType": "application/pdf",
            "size": "1024",
        });
        let data = base64::engine::general_purpose::STANDARD.encode(object.to_string());

        let mut env = serde_json::json!({ "message": { "data": data } });
        if let (Some(env_obj), Some(extra_obj)) = (env.as_object_mut(), extra.as_object()) {
            for (k, v) in extra_obj {
                if k == "attributes" {
                    if let Some(message) =
                        env_obj.get_mut("message").and_then(|m| m.as_object_mut())
                    {
                        message.insert(k.clone(), v.clone());
                    }
                } else {
                    env_obj.insert(k.clone(), v.clone());
                }
            }
        }
        env
    }

    #[test]
    fn parses_workspace_project_and_filename_segments() -> anyhow::Result<()> {
        let decision = parse_push_envelope(&envelope(
            "ws-1/proj-9/contracts/基本契約書.pdf",
            serde_json::json!({}),
        ))?;

        let EventDecision::Process(event) = decision else {
            anyhow::bail!("expected process decision: {decision:?}");
        };
        assert_eq!(event.workspace_id, "ws-1");
        assert_eq!(event.project_id, "proj-9");
        assert_eq!(event.filename, "contracts/基本契約書.pdf");
        assert_eq!(event.basename(), "基本契約書");
        assert_eq!(event.bucket, "contracts-prod");
        assert_eq!(event.delivery_attempt, 1);
        assert!(event.risk_type_ids.is_empty());
        Ok(())
    }

    #[test]
    fn short_object_path_is_malformed() {
        let err = parse_push_envelope(&envelope("ws-1/file.pdf", serde_json::json!({})));
        assert!(err.is_err());
    }

    #[test]
    fn non_pdf_is_ignored_not_rejected() -> anyhow::Result<()> {
        let decision =
            parse_push_envelope(&envelope("ws-1/proj-9/readme.txt", serde_json::json!({})))?;
        assert!(matches!(decision, EventDecision::Ignore { .. }));
        Ok(())
    }

    #[test]
    fn over_retried_event_is_dropped() -> anyhow::Result<()> {
        let decision = parse_push_envelope(&envelope(
            "ws-1/proj-9/a.pdf",
            serde_json::json!({ "deliveryAttempt": 3 }),
        ))?;
        assert!(matches!(decision, EventDecision::Ignore { .. }));

        let decision = parse_push_envelope(&envelope(
            "ws-1/proj-9/a.pdf",
            serde_json::json!({ "deliveryAttempt": 2 }),
        ))?;
        assert!(matches!(decision, EventDecision::Process(_)));

        // Values past u32 must not wrap back under the ceiling.
        let decision = parse_push_envelope(&envelope(
            "ws-1/proj-9/a.pdf",
            serde_json::json!({ "deliveryAttempt": 4_294_967_297u64 }),
        ))?;
        assert!(matches!(decision, EventDecision::Ignore { .. }));
        Ok(())
    }

    #[test]
    fn attributes_override_bucket_workspace_and_select_risk_ids() -> anyhow::Result<()> {
        let decision = parse_push_envelope(&envelope(
            "ws-1/proj-9/a.pdf",
            serde_json::json!({
                "attributes": {
                    "bucket": "contracts-staging",
                    "workspaceId": "ws-override",
                    "riskTypeIds": "3, 1,abc,7"
                }
            }),
        ))?;

        let EventDecision::Process(event) = decision else {
            anyhow::bail!("expected process decision: {decision:?}");
        };
        assert_eq!(event.bucket, "contracts-staging");
        assert_eq!(event.workspace_id, "ws-override");
        assert_eq!(event.risk_type_ids, vec![3, 1, 7]);
        Ok(())
    }

    #[test]
    fn from_object_path_splits_segments_like_the_envelope_path() -> anyhow::Result<()> {
        let event =
            IngestEvent::from_object_path("bucket", "ws-1/proj-9/docs/a.pdf", vec![2])?;
        assert_eq!(event.workspace_id, "ws-1");
        assert_eq!(event.project_id, "proj-9");
        assert_eq!(event.filename, "docs/a.pdf");
        assert_eq!(event.risk_type_ids, vec![2]);

        assert!(IngestEvent::from_object_path("bucket", "ws/a.pdf", vec![]).is_err());
        assert!(IngestEvent::from_object_path("bucket", "ws/proj/a.txt", vec![]).is_err());
        Ok(())
    }

    #[test]
    fn missing_message_is_malformed() {
        assert!(parse_push_envelope(&serde_json::json!({})).is_err());
    }

    #[test]
    fn empty_decoded_payload_is_ignored() -> anyhow::Result<()> {
        let data = base64::engine::general_purpose::STANDARD.encode("   ");
        let decision =
            parse_push_envelope(&serde_json::json!({ "message": { "data": data } }))?;
        assert!(matches!(decision, EventDecision::Ignore { .. }));
        Ok(())
    }
}
