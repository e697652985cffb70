//! Converts a POS order into the local `Order` shape.

use chrono::Utc;
use std::collections::HashMap;
use tracing::trace;

use crate::ids::{ModifierRef, PosId};
use crate::model::{Line, Modifier, Order};
use crate::pos::{PosLine, PosOrder};

/// Modifiers priced at one site, keyed by their (absolute) POS id.
#[derive(Debug, Clone)]
pub struct SiteMenuIndex {
    site_id: PosId,
    modifiers: HashMap<PosId, Modifier>,
}

impl SiteMenuIndex {
    pub fn new(site_id: PosId, modifiers: HashMap<PosId, Modifier>) -> Self {
        Self { site_id, modifiers }
    }

    pub fn site_id(&self) -> PosId {
        self.site_id
    }

    pub fn modifier(&self, pos_id: PosId) -> Option<&Modifier> {
        self.modifiers.get(&pos_id)
    }

    pub fn len(&self) -> usize {
        self.modifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modifiers.is_empty()
    }
}

/// Build an unsaved `Order` from the POS representation.
///
/// Each line's signed modifier ids are resolved against `index`; ids the
/// site menu does not know (option-set selections share the same field on
/// the POS) are skipped.
pub fn assemble_order(pos_order: &PosOrder, index: &SiteMenuIndex) -> Order {
    Order {
        id: None,
        pos_id: pos_order.id,
        site_id: pos_order.site_id,
        status: pos_order.status,
        table_name: pos_order.table.clone(),
        pager_number: pos_order.pager_number.clone(),
        customer_id: None,
        total: pos_order.total,
        total_tax: pos_order.total_tax,
        lines: pos_order
            .lines
            .iter()
            .map(|line| assemble_line(line, index))
            .collect(),
        created_at: Utc::now(),
        pickup_time: None,
    }
}

fn assemble_line(pos_line: &PosLine, index: &SiteMenuIndex) -> Line {
    let mut line = Line {
        id: None,
        pos_id: pos_line.id,
        order_id: None,
        product_name: pos_line.product_name.clone(),
        notes: pos_line.notes.clone(),
        quantity: pos_line.quantity,
        price: pos_line.price,
        total: pos_line.total,
        total_tax: pos_line.total_tax,
        added_modifiers: vec![],
        removed_modifiers: vec![],
    };

    for &raw in &pos_line.modifiers {
        let Some(decoded) = ModifierRef::decode(raw) else {
            trace!(line = %pos_line.id, raw, "skipping malformed modifier id");
            continue;
        };
        let Some(menu_modifier) = index.modifier(decoded.pos_id) else {
            trace!(line = %pos_line.id, modifier = %decoded.pos_id, "modifier not on site menu, skipping");
            continue;
        };

        let mut modifier = menu_modifier.clone();
        modifier.site_id = None;
        modifier.line_id = None;
        modifier.order_id = None;
        modifier.added = decoded.added;

        if decoded.added {
            line.added_modifiers.push(modifier);
        } else {
            line.removed_modifiers.push(modifier);
        }
    }

    line
}
