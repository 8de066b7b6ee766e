use sha2::{Digest, Sha256};

/// 内容摘要（sha256 十六进制）
pub fn content_digest(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}
