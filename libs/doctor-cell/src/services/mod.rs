pub mod directory;

pub use directory::SupabaseDoctorDirectory;
