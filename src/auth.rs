use sha1::{Digest, Sha1};

/// mysql_native_password stores SHA1(SHA1(password)) (20 bytes).
pub fn stage2_from_password(password: &[u8]) -> [u8; 20] {
    let stage1 = Sha1::digest(password);
    let stage2 = Sha1::digest(stage1);
    stage2.into()
}

/// Verify the mysql_native_password token (auth_data) against the
/// stored stage2 hash.
pub fn verify_native_password_token(
    salt: &[u8],
    stored_stage2: &[u8; 20],
    auth_data: &[u8],
) -> bool {
    if auth_data.len() != 20 {
        return false;
    }

    // token = stage1 XOR SHA1(salt + stage2)
    // => stage1 = token XOR SHA1(salt + stage2)
    let mut hasher = Sha1::new();
    hasher.update(salt);
    hasher.update(stored_stage2);
    let salt_stage2_hash: [u8; 20] = hasher.finalize().into();

    let mut stage1 = [0u8; 20];
    for i in 0..20 {
        stage1[i] = auth_data[i] ^ salt_stage2_hash[i];
    }

    let stage2_check: [u8; 20] = Sha1::digest(stage1).into();
    stage2_check == *stored_stage2
}

/// Check a client login against the configured gateway password.
/// An empty configured password accepts any client.
pub fn verify_mysql_native_password(
    salt: &[u8],
    auth_data: &[u8],
    configured_password: &str,
) -> bool {
    if configured_password.is_empty() {
        return true;
    }
    if auth_data.is_empty() {
        return false;
    }
    let stage2 = stage2_from_password(configured_password.as_bytes());
    verify_native_password_token(salt, &stage2, auth_data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scramble(salt: &[u8], password: &[u8]) -> [u8; 20] {
        // Client side: token = SHA1(pw) XOR SHA1(salt + SHA1(SHA1(pw)))
        let stage1: [u8; 20] = Sha1::digest(password).into();
        let stage2: [u8; 20] = Sha1::digest(stage1).into();
        let mut hasher = Sha1::new();
        hasher.update(salt);
        hasher.update(stage2);
        let mix: [u8; 20] = hasher.finalize().into();
        let mut token = [0u8; 20];
        for i in 0..20 {
            token[i] = stage1[i] ^ mix[i];
        }
        token
    }

    #[test]
    fn accepts_correct_scramble() {
        let salt = [7u8; 20];
        let token = scramble(&salt, b"secret");
        assert!(verify_mysql_native_password(&salt, &token, "secret"));
    }

    #[test]
    fn rejects_wrong_password() {
        let salt = [7u8; 20];
        let token = scramble(&salt, b"wrong");
        assert!(!verify_mysql_native_password(&salt, &token, "secret"));
    }

    #[test]
    fn empty_configured_password_accepts_all() {
        assert!(verify_mysql_native_password(&[0u8; 20], &[], ""));
        assert!(verify_mysql_native_password(&[0u8; 20], &[1, 2, 3], ""));
    }
}
