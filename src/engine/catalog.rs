use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::money::Price;

use super::reservations::no_open_cycle;
use super::{Engine, EngineError};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInput {
    pub id: Option<Ulid>,
    pub code: String,
    pub description: Option<String>,
    #[serde(default)]
    pub number_adults: u32,
    #[serde(default)]
    pub number_kids: u32,
    #[serde(default = "yes")]
    pub is_reservable: bool,
    pub area_id: Option<Ulid>,
}

#[derive(Debug, Clone)]
pub struct ProductInput {
    pub id: Option<Ulid>,
    pub name: String,
    pub kind: ProductKind,
    pub price: Decimal,
    /// Defaults to the business currency.
    pub currency: Option<String>,
    pub stock: Option<u32>,
    pub available_for_reservation: bool,
    pub always_available_for_reservation: bool,
    pub reservation_available_from: Option<Ms>,
    pub reservation_available_to: Option<Ms>,
    pub resource_ids: Vec<Ulid>,
    pub policy_ids: Vec<Ulid>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyInput {
    pub id: Option<Ulid>,
    pub name: String,
    #[serde(default = "yes")]
    pub active: bool,
    pub rule: PolicyRule,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInput {
    pub id: Option<Ulid>,
    pub name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesAreaInput {
    pub id: Option<Ulid>,
    pub name: String,
    pub kind: AreaKind,
    #[serde(default = "yes")]
    pub is_active: bool,
}

fn yes() -> bool {
    true
}

fn validate_name(name: &str, what: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::bad_request(format!("El {what} es obligatorio")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

impl Engine {
    pub async fn configure_business(&self, actor: Option<&str>, config: BusinessConfig) -> Result<BusinessConfig, EngineError> {
        if config.name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("name too long"));
        }
        if config.precision > MAX_PRECISION {
            return Err(EngineError::bad_request(format!(
                "La precisión no puede ser mayor que {MAX_PRECISION}"
            )));
        }
        if config.utc_offset_minutes.abs() > 14 * 60 {
            return Err(EngineError::bad_request("Desfase horario inválido"));
        }
        if config.default_currency.trim().is_empty() {
            return Err(EngineError::bad_request("La moneda por defecto es obligatoria"));
        }
        if config.online_shop_cancel_order_after_hours == Some(0) {
            return Err(EngineError::bad_request(
                "El plazo de cancelación debe ser de al menos una hora",
            ));
        }

        let mut txn = self.begin(actor).await?;
        txn.stage(Event::BusinessConfigured { config: config.clone() });
        self.commit(txn).await?;
        info!(business = %self.business_id, "business configured");
        Ok(config)
    }

    pub async fn open_economic_cycle(&self, actor: Option<&str>) -> Result<EconomicCycle, EngineError> {
        let mut txn = self.begin(actor).await?;
        if txn.store().open_cycle().is_some() {
            return Err(EngineError::not_allowed("Ya existe un ciclo económico abierto"));
        }
        let cycle = EconomicCycle {
            id: Ulid::new(),
            opened_at: txn.now,
            closed_at: None,
        };
        txn.stage(Event::CycleOpened { cycle: cycle.clone() });
        self.commit(txn).await?;
        info!(business = %self.business_id, cycle = %cycle.id, "economic cycle opened");
        Ok(cycle)
    }

    pub async fn close_economic_cycle(&self, actor: Option<&str>) -> Result<EconomicCycle, EngineError> {
        let mut txn = self.begin(actor).await?;
        let mut cycle = txn.store().open_cycle().cloned().ok_or_else(no_open_cycle)?;
        cycle.closed_at = Some(txn.now);
        txn.stage(Event::CycleClosed {
            id: cycle.id,
            closed_at: txn.now,
        });
        self.commit(txn).await?;
        info!(business = %self.business_id, cycle = %cycle.id, "economic cycle closed");
        Ok(cycle)
    }

    pub async fn upsert_resource(&self, actor: Option<&str>, input: ResourceInput) -> Result<Resource, EngineError> {
        validate_name(&input.code, "código del recurso")?;
        if input.description.as_ref().is_some_and(|d| d.len() > MAX_TEXT_LEN) {
            return Err(EngineError::LimitExceeded("description too long"));
        }

        let mut txn = self.begin(actor).await?;
        let id = input.id.unwrap_or_else(Ulid::new);
        txn.store().ensure_not_foreign(id, "resource")?;
        if let Some(area_id) = input.area_id {
            txn.store().area(area_id)?;
        }
        let resource = Resource {
            id,
            code: input.code,
            description: input.description,
            number_adults: input.number_adults,
            number_kids: input.number_kids,
            is_reservable: input.is_reservable,
            area_id: input.area_id,
        };
        txn.stage(Event::ResourceSaved { resource: resource.clone() });
        self.commit(txn).await?;
        Ok(resource)
    }

    /// Rejected while any live reservation still holds the resource, or a
    /// pending pre-receipt still quotes it.
    pub async fn delete_resource(&self, actor: Option<&str>, id: Ulid) -> Result<(), EngineError> {
        let mut txn = self.begin(actor).await?;
        let store = txn.store();
        let code = store.resource(id)?.code.clone();
        if store.resource_slots(Some(id)).is_some_and(|index| !index.is_empty()) {
            return Err(EngineError::not_allowed(format!(
                "El recurso {code} tiene reservas activas"
            )));
        }
        let quoted = store.orders.values().any(|o| {
            o.is_pre_receipt
                && o.status.is_live()
                && o.reservation_lines().any(|(_, slot)| slot.resource_id == Some(id))
        });
        if quoted {
            return Err(EngineError::not_allowed(format!(
                "El recurso {code} tiene pre-recibos pendientes"
            )));
        }
        txn.stage(Event::ResourceDeleted { id });
        self.commit(txn).await?;
        info!(business = %self.business_id, resource = %id, "resource deleted");
        Ok(())
    }

    pub async fn upsert_product(&self, actor: Option<&str>, input: ProductInput) -> Result<Product, EngineError> {
        validate_name(&input.name, "nombre del producto")?;
        if input.price < Decimal::ZERO {
            return Err(EngineError::bad_request("El precio no puede ser negativo"));
        }
        if input.available_for_reservation && input.kind != ProductKind::Service {
            return Err(EngineError::not_allowed("Solo los productos de tipo servicio pueden reservarse"));
        }
        if let (Some(from), Some(to)) = (input.reservation_available_from, input.reservation_available_to)
            && from > to
        {
            return Err(EngineError::bad_request(
                "El inicio del período de reservas debe ser anterior a su fin",
            ));
        }

        let mut txn = self.begin(actor).await?;
        let id = input.id.unwrap_or_else(Ulid::new);
        {
            let store = txn.store();
            store.ensure_not_foreign(id, "product")?;
            for resource_id in &input.resource_ids {
                store.resource(*resource_id)?;
            }
            for policy_id in &input.policy_ids {
                store.policy(*policy_id)?;
            }
        }
        let currency = input
            .currency
            .unwrap_or_else(|| txn.store().config.default_currency.clone());
        let product = Product {
            id,
            name: input.name,
            kind: input.kind,
            price: Price::new(input.price, currency),
            stock: input.stock,
            available_for_reservation: input.available_for_reservation,
            always_available_for_reservation: input.always_available_for_reservation,
            reservation_available_from: input.reservation_available_from,
            reservation_available_to: input.reservation_available_to,
            resource_ids: input.resource_ids,
            policy_ids: input.policy_ids,
        };
        txn.stage(Event::ProductSaved { product: product.clone() });
        self.commit(txn).await?;
        Ok(product)
    }

    pub async fn upsert_policy(&self, actor: Option<&str>, input: PolicyInput) -> Result<ReservationPolicy, EngineError> {
        validate_name(&input.name, "nombre de la política")?;
        let valid = match input.rule {
            PolicyRule::MinDuration { ms } | PolicyRule::MaxDuration { ms } => ms > 0,
            PolicyRule::MinAdvanceNotice { ms } => ms >= 0,
            PolicyRule::MaxGuests { guests } => guests > 0,
        };
        if !valid {
            return Err(EngineError::bad_request("La regla de la política no es válida"));
        }

        let mut txn = self.begin(actor).await?;
        let id = input.id.unwrap_or_else(Ulid::new);
        txn.store().ensure_not_foreign(id, "policy")?;
        let policy = ReservationPolicy {
            id,
            name: input.name,
            active: input.active,
            rule: input.rule,
        };
        txn.stage(Event::PolicySaved { policy: policy.clone() });
        self.commit(txn).await?;
        Ok(policy)
    }

    pub async fn upsert_client(&self, actor: Option<&str>, input: ClientInput) -> Result<Client, EngineError> {
        validate_name(&input.name, "nombre del cliente")?;
        let mut txn = self.begin(actor).await?;
        let id = input.id.unwrap_or_else(Ulid::new);
        txn.store().ensure_not_foreign(id, "client")?;
        let client = Client {
            id,
            name: input.name,
            email: input.email,
        };
        txn.stage(Event::ClientSaved { client: client.clone() });
        self.commit(txn).await?;
        Ok(client)
    }

    pub async fn upsert_sales_area(&self, actor: Option<&str>, input: SalesAreaInput) -> Result<SalesArea, EngineError> {
        validate_name(&input.name, "nombre del área")?;
        let mut txn = self.begin(actor).await?;
        let id = input.id.unwrap_or_else(Ulid::new);
        txn.store().ensure_not_foreign(id, "area")?;
        let area = SalesArea {
            id,
            name: input.name,
            kind: input.kind,
            is_active: input.is_active,
        };
        txn.stage(Event::SalesAreaSaved { area: area.clone() });
        self.commit(txn).await?;
        Ok(area)
    }
}
