pub mod jwt;
pub mod logout;
pub mod session;
