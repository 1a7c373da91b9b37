pub mod origin;

pub use origin::ChangeOrigin;
