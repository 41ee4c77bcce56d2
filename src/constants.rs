pub mod bootstrap {

    pub const ADMIN_EMAIL: &str = "admin@terraintrack.local";

    /// Seeded password for the bootstrap administrator; change it after first login.
    pub const ADMIN_PASSWORD: &str = "password";

    pub const ADMIN_ROLE: &str = "super_admin";
}

pub mod session_keys {

    pub const USER: &str = "user";

    pub const AUTHENTICATED: &str = "authenticated";

    pub const LAST_ACTIVITY: &str = "last_activity";

    pub const PENDING_2FA_USER: &str = "pending_2fa_user";

    pub const PENDING_2FA_FAILURES: &str = "pending_2fa_failures";

    pub const CSRF_TOKEN: &str = "csrf_token";
}

pub mod two_factor {

    pub const OTP_DIGITS: u32 = 6;

    pub const RECOVERY_CODE_COUNT: usize = 8;

    /// Wrong codes tolerated per pending login before it is dropped.
    pub const MAX_FAILED_ATTEMPTS: u32 = 5;
}

pub mod limits {

    pub const MIN_SESSION_TIMEOUT_MINUTES: u32 = 5;

    pub const MAX_NAME_LENGTH: usize = 100;
}

pub const CSRF_HEADER: &str = "x-csrf-token";

/// How often expired rows are swept from the `SQLite` session table.
pub const SESSION_CLEANUP_INTERVAL_SECS: u64 = 60;
