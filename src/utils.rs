//! Utility functions for the matchbot

use crate::types::{QueueInstanceId, SessionId};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use rand::Rng;
use uuid::Uuid;

const PASSWORD_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!$%^&*()";

/// Generate a new unique ready-check session ID
pub fn generate_session_id() -> SessionId {
    Uuid::new_v4()
}

/// Generate the tag for a newly opened queue
pub fn generate_queue_instance_id() -> QueueInstanceId {
    Uuid::new_v4()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Random in-game password, only used to stop player spoofing for one match
pub fn generate_password(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| PASSWORD_ALPHABET[rng.gen_range(0..PASSWORD_ALPHABET.len())] as char)
        .collect()
}

/// Password encoding expected by the lobby LOGIN command: base64(md5(password))
pub fn hash_password(password: &str) -> String {
    let digest = Md5::digest(password.as_bytes());
    STANDARD.encode(digest)
}
