pub mod assets;
pub mod backup;
pub mod core;
pub mod courses;
pub mod exchange;
pub mod grades;
pub mod split;
pub mod students;
