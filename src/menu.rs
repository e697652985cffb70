//! Menu reconciliation against the POS.
//!
//! A full pass fetches every site's menu tree, upserts it into the local
//! cache keyed by POS id, and deletes any cached category, item, modifier or
//! option set that no site mentions any more. The POS ids present before the
//! pass are recorded up front; orphans are what remains of that set once
//! every site has been traversed.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::db::DbState;
use crate::error::{Error, PosError, PosResultExt, Result, StoreResult};
use crate::ids::{LocalId, PosId};
use crate::menu_store::{self, MenuTable};
use crate::model::{Category, ClientMenu};
use crate::pos::{PosCategory, PosClient, PosMenu, PosSite};

/// Entity classes in the order orphans are deleted.
const DELETION_ORDER: [MenuTable; 4] = [
    MenuTable::Categories,
    MenuTable::MenuItems,
    MenuTable::Modifiers,
    MenuTable::OptionSets,
];

/// Outcome of a full menu pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MenuSyncSummary {
    pub sites: usize,
    /// Sites inserted or whose menu hash changed.
    pub sites_changed: usize,
    pub categories_deleted: usize,
    pub items_deleted: usize,
    pub modifiers_deleted: usize,
    pub option_sets_deleted: usize,
}

impl MenuSyncSummary {
    fn record_deleted(&mut self, table: MenuTable, count: usize) {
        match table {
            MenuTable::Categories => self.categories_deleted = count,
            MenuTable::MenuItems => self.items_deleted = count,
            MenuTable::Modifiers => self.modifiers_deleted = count,
            MenuTable::OptionSets => self.option_sets_deleted = count,
        }
    }
}

// ---------------------------------------------------------------------------
// Orphan tracking
// ---------------------------------------------------------------------------

/// POS ids per menu entity class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MenuIds {
    pub categories: HashSet<PosId>,
    pub menu_items: HashSet<PosId>,
    pub modifiers: HashSet<PosId>,
    pub option_sets: HashSet<PosId>,
}

impl MenuIds {
    /// Everything currently cached, across all sites.
    fn load(conn: &rusqlite::Connection) -> StoreResult<Self> {
        Ok(Self {
            categories: menu_store::select_pos_ids(conn, MenuTable::Categories)?,
            menu_items: menu_store::select_pos_ids(conn, MenuTable::MenuItems)?,
            modifiers: menu_store::select_pos_ids(conn, MenuTable::Modifiers)?,
            option_sets: menu_store::select_pos_ids(conn, MenuTable::OptionSets)?,
        })
    }

    /// Mark every entity of a site's tree as seen.
    pub fn mark_tree(&mut self, categories: &[PosCategory]) {
        for category in categories {
            self.categories.insert(category.id);
            for item in &category.menu_items {
                self.menu_items.insert(item.id);
                self.modifiers.extend(item.modifiers.iter().map(|m| m.id));
                for option_set in &item.option_sets {
                    self.option_sets.insert(option_set.id);
                    self.modifiers.extend(option_set.options.iter().map(|m| m.id));
                }
            }
        }
    }

    pub fn get(&self, table: MenuTable) -> &HashSet<PosId> {
        match table {
            MenuTable::Categories => &self.categories,
            MenuTable::MenuItems => &self.menu_items,
            MenuTable::Modifiers => &self.modifiers,
            MenuTable::OptionSets => &self.option_sets,
        }
    }

    /// `self - seen`, per class.
    pub fn orphans(&self, seen: &MenuIds, table: MenuTable) -> Vec<PosId> {
        let mut ids: Vec<PosId> = self.get(table).difference(seen.get(table)).copied().collect();
        ids.sort();
        ids
    }
}

/// Deterministic digest of a site's category tree.
///
/// Computed over the POS representation, before any local id exists, and
/// sensitive to the order of every list in the tree.
pub fn compute_menu_hash(categories: &[PosCategory]) -> std::result::Result<String, PosError> {
    let serialized = serde_json::to_vec(categories)?;
    Ok(format!("{:x}", md5::compute(serialized)))
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

pub struct MenuReconciler<P: PosClient + ?Sized> {
    db: Arc<DbState>,
    pos: Arc<P>,
    force_writes: bool,
}

impl<P: PosClient + ?Sized> MenuReconciler<P> {
    pub fn new(db: Arc<DbState>, pos: Arc<P>) -> Self {
        Self {
            db,
            pos,
            force_writes: false,
        }
    }

    /// Rewrite every site's tree even when its menu hash is unchanged.
    pub fn force_writes(mut self, force: bool) -> Self {
        self.force_writes = force;
        self
    }

    /// Reconcile the local menu cache with every site on the POS.
    ///
    /// Any failure aborts the pass before orphan deletion. Sites processed
    /// before the failure keep their committed writes; re-running converges.
    pub async fn sync_all_menus(&self) -> Result<MenuSyncSummary> {
        const OP: &str = "sync all menus";

        let sites = self.pos.get_all_sites().await.upstream_ctx(OP)?;
        let existing = self.db.with_conn(OP, MenuIds::load)?;
        debug!(
            sites = sites.len(),
            categories = existing.categories.len(),
            items = existing.menu_items.len(),
            modifiers = existing.modifiers.len(),
            option_sets = existing.option_sets.len(),
            "menu_sync: starting pass"
        );

        let mut seen = MenuIds::default();
        let mut item_parents = HashMap::new();
        let mut summary = MenuSyncSummary::default();

        for site in &sites {
            let menu = self.pos.get_menu_for_site(site.id).await.upstream_ctx(OP)?;
            if menu.categories.is_empty() {
                warn!(site = %site.id, "menu_sync: POS returned an empty menu, its cached entries will be removed");
            }
            seen.mark_tree(&menu.categories);
            record_item_parents(&menu.categories, &mut item_parents);
            if self.sync_site(site, &menu)? {
                summary.sites_changed += 1;
            }
            summary.sites += 1;
        }

        for table in DELETION_ORDER {
            let orphans = existing.orphans(&seen, table);
            if orphans.is_empty() {
                continue;
            }
            let refiled = self.db.with_tx(OP, |tx| {
                let refiled = if table == MenuTable::Categories {
                    refile_listed_items(tx, &orphans, &item_parents)?
                } else {
                    0
                };
                for pos_id in &orphans {
                    menu_store::delete_by_pos_id(tx, table, *pos_id)?;
                }
                Ok(refiled)
            })?;
            if refiled > 0 {
                debug!(refiled, "menu_sync: moved listed items out of deleted categories");
            }
            trace!(?table, count = orphans.len(), "menu_sync: deleted orphans");
            summary.record_deleted(table, orphans.len());
        }

        info!(
            sites = summary.sites,
            sites_changed = summary.sites_changed,
            categories_deleted = summary.categories_deleted,
            items_deleted = summary.items_deleted,
            modifiers_deleted = summary.modifiers_deleted,
            option_sets_deleted = summary.option_sets_deleted,
            "menu_sync: pass complete"
        );
        Ok(summary)
    }

    /// Write one site's tree as a single atomic unit. Returns whether the
    /// site was new or its menu hash changed.
    fn sync_site(&self, site: &PosSite, menu: &PosMenu) -> Result<bool> {
        const OP: &str = "sync site menu";

        let hash = compute_menu_hash(&menu.categories).upstream_ctx(OP)?;
        let force = self.force_writes;

        self.db.with_tx(OP, |tx| {
            let (site_id, changed) = match menu_store::get_site(tx, site.id)? {
                None => (menu_store::insert_site(tx, site, &hash)?, true),
                Some(stored) if stored.menu_hash != hash => {
                    menu_store::update_site_menu_hash(tx, site, &hash)?;
                    (stored.id, true)
                }
                Some(stored) => (stored.id, false),
            };

            if changed || force {
                write_menu_tree(tx, site_id, &menu.categories)?;
                debug!(site = %site.id, %hash, changed, "menu_sync: site tree written");
            } else {
                trace!(site = %site.id, %hash, "menu_sync: menu hash unchanged, skipping writes");
            }
            Ok(changed)
        })
    }

    /// Client-facing menu of a site, with site prices.
    pub fn get_menu_for_site(&self, site_id: PosId) -> Result<ClientMenu> {
        const OP: &str = "get menu for site";

        let menu = self.db.with_conn(OP, |conn| {
            let Some(site) = menu_store::get_site(conn, site_id)? else {
                return Ok(None);
            };
            let mut categories = menu_store::select_categories_for_site(conn, site_id)?;
            categories.retain(|c| c.client_facing);
            for category in &mut categories {
                let mut items = menu_store::select_menu_items_for_category(conn, site_id, category.id)?;
                for item in &mut items {
                    item.modifiers = menu_store::select_item_modifiers(conn, site_id, item.id)?;
                    item.option_sets = menu_store::select_item_option_sets(conn, item.id)?;
                }
                category.menu_items = items;
            }
            Ok(Some(ClientMenu {
                site_id,
                updated_at: site.updated_at,
                categories,
            }))
        })?;

        menu.ok_or_else(|| Error::not_found(OP, format!("site {site_id}")))
    }

    /// Set the local-only flags of a category. Sync never overwrites these.
    pub fn set_category_flags(
        &self,
        category_id: LocalId,
        client_facing: bool,
        instore_only: bool,
    ) -> Result<Category> {
        const OP: &str = "set category flags";

        let category = self.db.with_tx(OP, |tx| {
            if menu_store::set_category_flags(tx, category_id, client_facing, instore_only)? == 0 {
                return Ok(None);
            }
            menu_store::get_category(tx, category_id)
        })?;

        category.ok_or_else(|| Error::not_found(OP, format!("category {category_id}")))
    }
}

/// Remember, per item, a category that currently lists it.
fn record_item_parents(categories: &[PosCategory], parents: &mut HashMap<PosId, PosId>) {
    for category in categories {
        for item in &category.menu_items {
            parents.insert(item.id, category.id);
        }
    }
}

/// An item stores a single parent category, and deleting a category takes
/// its items with it. Items that some site still lists are moved under a
/// category that lists them before their old parent is deleted. Sites whose
/// writes were skipped never re-filed their items, so this is what keeps
/// the skip from losing them.
fn refile_listed_items(
    conn: &rusqlite::Connection,
    orphan_categories: &[PosId],
    item_parents: &HashMap<PosId, PosId>,
) -> StoreResult<usize> {
    let mut moved = 0;
    for category in orphan_categories {
        for item in menu_store::select_item_pos_ids_in_category(conn, *category)? {
            let Some(parent) = item_parents.get(&item) else {
                continue;
            };
            if menu_store::move_menu_item(conn, item, *parent)? > 0 {
                moved += 1;
            } else {
                warn!(%item, %parent, "menu_sync: listing category not cached, item goes with its old category");
            }
        }
    }
    Ok(moved)
}

fn write_menu_tree(
    conn: &rusqlite::Connection,
    site_id: LocalId,
    categories: &[PosCategory],
) -> StoreResult<()> {
    menu_store::clear_site_categories(conn, site_id)?;
    for category in categories {
        let category_id = menu_store::upsert_category(conn, site_id, category)?;
        for item in &category.menu_items {
            let item_id = menu_store::upsert_menu_item(conn, site_id, category_id, item)?;
            for modifier in &item.modifiers {
                menu_store::upsert_item_modifier(conn, site_id, item_id, modifier)?;
            }
            for option_set in &item.option_sets {
                let set_id = menu_store::upsert_option_set(conn, item_id, option_set)?;
                for (position, option) in option_set.options.iter().enumerate() {
                    menu_store::upsert_option_set_modifier(conn, site_id, set_id, position, option)?;
                }
            }
        }
    }
    Ok(())
}
