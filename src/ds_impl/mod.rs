pub mod hp;
pub mod nr;
