/// Key layout for the ledger partitions
///
/// - `jobs`: job:{job_id} -> Job (JSON)
/// - `owner_jobs`: owner:{owner_id}:{job_id} -> empty (secondary index)
/// - `boxes`: box:{blueprint_id} -> Blueprint (JSON)
/// - `metadata`: meta:{key} -> value

pub fn encode_job_key(job_id: &str) -> Vec<u8> {
    format!("job:{}", job_id).into_bytes()
}

pub fn decode_job_key(key: &[u8]) -> Option<String> {
    let key_str = std::str::from_utf8(key).ok()?;
    key_str.strip_prefix("job:").map(String::from)
}

pub fn encode_owner_key(owner_id: &str, job_id: &str) -> Vec<u8> {
    format!("owner:{}:{}", owner_id, job_id).into_bytes()
}

/// Prefix for a range scan over one owner's jobs: owner:{owner_id}:
pub fn encode_owner_prefix(owner_id: &str) -> Vec<u8> {
    format!("owner:{}:", owner_id).into_bytes()
}

/// Job id from an owner index key, given the owner's scan prefix.
///
/// Returns `None` for keys that belong to a different owner whose id merely
/// starts with the same characters (`a` vs `a:b`).
pub fn decode_owner_key(prefix: &[u8], key: &[u8]) -> Option<String> {
    let rest = key.strip_prefix(prefix)?;
    let job_id = std::str::from_utf8(rest).ok()?;
    if job_id.is_empty() || job_id.contains(':') {
        return None;
    }
    Some(job_id.to_string())
}

pub fn encode_box_key(blueprint_id: &str) -> Vec<u8> {
    format!("box:{}", blueprint_id).into_bytes()
}

pub fn encode_meta_key(key: &str) -> Vec<u8> {
    format!("meta:{}", key).into_bytes()
}
