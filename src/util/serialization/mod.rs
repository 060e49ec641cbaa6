pub mod local_rfc3339;
pub mod mib_to_kib;
