//! Route paths.

pub const POST_AUTH_LOGIN: &str = "/auth/login";
pub const POST_AUTH_TOKEN: &str = "/auth/token";
pub const POST_AUTH_TOKEN_REJECT: &str = "/auth/token/reject";
pub const POST_AUTH_PASSWORD: &str = "/auth/password";
pub const POST_AUTH_RESET_TOKEN: &str = "/auth/reset-token";
pub const POST_AUTH_RESET_PASSWORD: &str = "/auth/reset-password/{token}";
pub const POST_AUTH_VERIFICATION: &str = "/auth/verification";
pub const POST_AUTH_VERIFY: &str = "/auth/verify/{token}";
pub const GET_AUTH_VERIFICATION_STATUS: &str = "/auth/verification-status";
