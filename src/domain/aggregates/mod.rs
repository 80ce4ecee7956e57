//! Aggregates module
pub mod account;
pub mod cart;
pub mod category;
pub mod coupon;
pub mod engagement;
pub mod order;
pub mod payment;
pub mod product;

pub use account::{Account, AddressInput, CheckoutDefaults, NewAccount, ProfileUpdate, ShippingAddress, User, UserProfile};
pub use cart::{Cart, CartItem, CartSummary, LineChange};
pub use category::{Category, CategoryListing, NewCategory};
pub use coupon::{Coupon, CouponPreview, CouponRejection, DiscountType, NewCoupon};
pub use engagement::{Review, ReviewInput, WishlistItem};
pub use order::{Order, OrderDetail, OrderLine, OrderStatus, PaymentMethod, PaymentStatus};
pub use payment::{Payment, PaymentState, PaymentUpdate};
pub use product::{NewProduct, Product, ProductView, MAX_PRICE};
