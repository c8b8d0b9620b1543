pub mod attendance;
pub mod classes;
pub mod core;
pub mod grades;
pub mod reset;
pub mod roster;
pub mod session;
pub mod students;
