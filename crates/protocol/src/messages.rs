use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Session negotiation
// ---------------------------------------------------------------------------

/// Asks the endpoint to open (or reopen) an upload for a bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreCreateRequest {
    /// Bundle file name as it should appear on the remote side.
    pub name: String,
    /// Full size of the local file in bytes.
    pub size: i64,
}

/// Endpoint answer to [`PreCreateRequest`].
///
/// Values are signed on the wire; the transfer layer validates them
/// before any block is planned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreCreateResponse {
    pub upload_id: String,
    /// Number of leading blocks already committed by the endpoint.
    #[serde(default)]
    pub partseq: i64,
    /// Bytes per block, fixed for the whole upload.
    pub block_bytes: i64,
}

// ---------------------------------------------------------------------------
// Block transmission
// ---------------------------------------------------------------------------

/// Metadata sent alongside the raw bytes of one block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub upload_id: String,
    /// 1-based block index; the endpoint places the block by index so
    /// arrival order does not matter.
    pub index: u64,
    pub size: u64,
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// Tells the endpoint no more blocks are coming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadRequest {
    pub upload_id: String,
}

/// Endpoint answer to [`CompleteUploadRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub size: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}
