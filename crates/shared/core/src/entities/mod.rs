mod holding;
mod order;
mod order_status;
mod profile;
mod side;

pub use holding::Holding;
pub use order::Order;
pub use order_status::OrderStatus;
pub use profile::TraderProfile;
pub use side::Side;
