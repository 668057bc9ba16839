pub mod cart;
pub mod cart_discount;
pub mod cart_item;
pub mod discount_rule;
pub mod order;
pub mod order_item;
pub mod product;

pub use cart::Entity as Cart;
pub use cart_discount::Entity as CartDiscount;
pub use cart_item::Entity as CartItem;
pub use discount_rule::Entity as DiscountRule;
pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use product::Entity as Product;

pub use cart::Model as CartModel;
pub use discount_rule::Model as DiscountRuleModel;
pub use order::Model as OrderModel;
pub use product::Model as ProductModel;
