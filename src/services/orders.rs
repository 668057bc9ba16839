use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    clients::shipping::{ShipmentDispatcher, TrackingInfo},
    entities::{order, order_item, Order, OrderItem, OrderModel},
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Read/administer orders: per-customer history, the global admin projection,
/// status transitions and cancellation.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    dispatcher: Arc<dyn ShipmentDispatcher>,
}

/// An order with its frozen line items.
#[derive(Debug, Serialize)]
pub struct OrderDetail {
    pub order: OrderModel,
    pub items: Vec<order_item::Model>,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        dispatcher: Arc<dyn ShipmentDispatcher>,
    ) -> Self {
        Self {
            db,
            event_sender,
            dispatcher,
        }
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderDetail, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .all(&*self.db)
            .await?;

        Ok(OrderDetail { order, items })
    }

    /// Order history for one customer, newest first.
    pub async fn list_for_customer(
        &self,
        customer_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderDetail>, u64), ServiceError> {
        let paginator = Order::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        let mut details = Vec::with_capacity(orders.len());
        for order in orders {
            let items = OrderItem::find()
                .filter(order_item::Column::OrderId.eq(order.id))
                .all(&*self.db)
                .await?;
            details.push(OrderDetail { order, items });
        }

        Ok((details, total))
    }

    /// Global order listing for administrative review, newest first.
    pub async fn list_all(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderDetail>, u64), ServiceError> {
        let paginator = Order::find()
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        let mut details = Vec::with_capacity(orders.len());
        for order in orders {
            let items = OrderItem::find()
                .filter(order_item::Column::OrderId.eq(order.id))
                .all(&*self.db)
                .await?;
            details.push(OrderDetail { order, items });
        }

        Ok((details, total))
    }

    /// Administrative status transition. Moving to Shipped also fetches
    /// tracking from the dispatcher when a shipment exists; tracking failures
    /// are logged, not fatal.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: order::OrderStatus,
    ) -> Result<(OrderModel, Option<TrackingInfo>), ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let old_status = order.order_status;
        let shipment_id = order.shipment_id.clone();

        let mut active: order::ActiveModel = order.into();
        active.order_status = Set(new_status);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: old_status.to_string(),
                new_status: new_status.to_string(),
            })
            .await;

        let tracking = if new_status == order::OrderStatus::Shipped {
            match shipment_id {
                Some(shipment_id) => match self.dispatcher.track(&shipment_id).await {
                    Ok(info) => Some(info),
                    Err(err) => {
                        warn!(
                            "Tracking lookup failed for shipment {}: {}",
                            shipment_id, err
                        );
                        None
                    }
                },
                None => None,
            }
        } else {
            None
        };

        Ok((updated, tracking))
    }

    /// Administrative cancel: best-effort shipment cancellation, then the
    /// record is removed. Delivered orders are immutable.
    #[instrument(skip(self))]
    pub async fn delete_order(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.order_status == order::OrderStatus::Delivered {
            return Err(ServiceError::InvalidOperation(
                "Delivered orders cannot be deleted".to_string(),
            ));
        }

        if let Some(shipment_id) = &order.shipment_id {
            if let Err(err) = self.dispatcher.cancel(shipment_id).await {
                warn!(
                    "Failed to cancel shipment {} for order {}: {}",
                    shipment_id, order.order_number, err
                );
            } else {
                self.event_sender
                    .send_or_log(Event::ShipmentCancelled(order.id))
                    .await;
            }
        }

        let txn = self.db.begin().await?;
        OrderItem::delete_many()
            .filter(order_item::Column::OrderId.eq(order.id))
            .exec(&txn)
            .await?;
        Order::delete_by_id(order.id).exec(&txn).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderCancelled(order_id))
            .await;
        info!("Deleted order {} ({})", order_id, order.order_number);
        Ok(())
    }
}
