pub mod announcements;
pub mod assignments;
pub mod classes;
pub mod core;
pub mod events;
pub mod notifications;
pub mod opportunities;
pub mod students;
pub mod workshops;
