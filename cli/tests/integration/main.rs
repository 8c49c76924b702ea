mod common;
mod containment;
mod suspend_resume;
