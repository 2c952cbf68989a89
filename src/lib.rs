pub mod config;
pub mod error;
pub mod events;
pub mod supervisor;
pub mod platform {
    pub mod capability;
}
pub mod tasks {
    pub mod recovery;
    pub mod scene;
}
