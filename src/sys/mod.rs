#[macro_use]
mod macros;

pub mod fd;
pub mod eventfd;
pub mod epoll;

pub use epoll::{Epoll, Events};
