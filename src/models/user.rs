//! Caller identity as delivered by the upstream authentication layer.

use serde::Serialize;

/// Authenticated user. The gateway only needs the id for ownership checks
/// and the active flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuthUser {
    pub id: i64,
    pub is_active: bool,
}

#[cfg(test)]
impl AuthUser {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            is_active: true,
        }
    }
}
