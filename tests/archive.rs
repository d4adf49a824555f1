#[path = "archive/container.rs"]
mod container;
#[path = "archive/merged.rs"]
mod merged;
