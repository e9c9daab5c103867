// Error codes returned in API error bodies

pub mod validation {
    pub const MISSING_BODY: &str = "VALIDATION_1002";
    pub const INVALID_FORMAT: &str = "VALIDATION_1003";
}

pub mod broker {
    pub const PUBLISH_FAILED: &str = "BROKER_5001";
}

pub mod system {
    pub const INTERNAL_ERROR: &str = "SYS_9001";
}
