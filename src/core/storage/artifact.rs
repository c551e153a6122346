use crate::core::encode::{EncodedGif, GIF_SIGNATURE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactMetadata {
    pub width: u32,
    pub height: u32,
    pub frame_count: usize,
    pub duration_sec: f64,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// 生成好的 GIF，创建后不可修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GifArtifact {
    id: String,
    #[serde(with = "blob_base64")]
    blob: Vec<u8>,
    metadata: ArtifactMetadata,
}

impl GifArtifact {
    pub fn from_encoded(id: impl Into<String>, encoded: EncodedGif) -> Self {
        let metadata = ArtifactMetadata {
            width: encoded.width,
            height: encoded.height,
            frame_count: encoded.frame_count,
            duration_sec: encoded.duration_sec,
            size_bytes: encoded.bytes.len() as u64,
            created_at: Utc::now(),
        };
        Self {
            id: id.into(),
            blob: encoded.bytes,
            metadata,
        }
    }

    pub(crate) fn from_parts(id: String, blob: Vec<u8>, metadata: ArtifactMetadata) -> Self {
        Self { id, blob, metadata }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    pub fn metadata(&self) -> &ArtifactMetadata {
        &self.metadata
    }

    pub fn summary(&self) -> ArtifactSummary {
        ArtifactSummary {
            id: self.id.clone(),
            metadata: self.metadata.clone(),
        }
    }

    pub fn into_blob(self) -> Vec<u8> {
        self.blob
    }

    pub fn has_valid_signature(&self) -> bool {
        self.blob.starts_with(GIF_SIGNATURE)
    }
}

/// 列表用的轻量记录（不含二进制）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub id: String,
    pub metadata: ArtifactMetadata,
}

mod blob_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
