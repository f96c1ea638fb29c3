mod driver;
pub use driver::*;

mod loopback;
pub use loopback::*;

mod netif;
pub use netif::*;

mod pipe;
pub use pipe::*;
