//! Shared test catalog and equipment set.
//!
//! Three tiers:
//!
//! ```text
//! drive_unit = gearbox + motor
//! gearbox    = 2 gear + shaft + housing
//! motor      = coil + shaft + housing
//! gear       = 2 steel_bar      shaft = 1 steel_bar
//! coil       = 3 copper_wire    housing = 2 polymer_resin
//! ```

use crate::models::{
    BaseItem, Capability, EquipmentCatalog, EquipmentDefinition, Inventory, ItemCatalog,
    ItemInstance,
};

pub(crate) fn catalog() -> ItemCatalog {
    ItemCatalog::new()
        .with_item(BaseItem::raw("steel_bar").with_value(5.0))
        .with_item(BaseItem::raw("copper_wire").with_value(3.0))
        .with_item(BaseItem::raw("polymer_resin").with_value(2.0))
        .with_item(
            BaseItem::shaped("gear")
                .with_input("steel_bar", 2)
                .with_build_time(60_000),
        )
        .with_item(
            BaseItem::shaped("shaft")
                .with_input("steel_bar", 1)
                .with_build_time(60_000),
        )
        .with_item(
            BaseItem::shaped("coil")
                .with_input("copper_wire", 3)
                .with_build_time(60_000),
        )
        .with_item(
            BaseItem::shaped("housing")
                .with_input("polymer_resin", 2)
                .with_build_time(60_000),
        )
        .with_item(
            BaseItem::assembly("gearbox")
                .with_input("gear", 2)
                .with_input("shaft", 1)
                .with_input("housing", 1)
                .with_build_time(120_000),
        )
        .with_item(
            BaseItem::assembly("motor")
                .with_input("coil", 1)
                .with_input("shaft", 1)
                .with_input("housing", 1)
                .with_build_time(120_000),
        )
        .with_item(
            BaseItem::assembly("drive_unit")
                .with_input("gearbox", 1)
                .with_input("motor", 1)
                .with_build_time(180_000),
        )
}

pub(crate) fn equipment() -> EquipmentCatalog {
    [
        ("lathe_basic", Capability::level("machining", 10.0)),
        ("lathe_precision", Capability::level("machining", 20.0)),
        ("assembly_bench", Capability::level("assembly", 10.0)),
        ("teardown_station", Capability::level("disassembly", 10.0)),
        ("wash_tank", Capability::flag("cleaning", true)),
        ("sandblaster", Capability::level("surface_treatment", 10.0)),
        ("welder", Capability::level("welding", 15.0)),
        ("shelf", Capability::storage("storage", 100.0)),
    ]
    .into_iter()
    .fold(EquipmentCatalog::new(), |catalog, (id, capability)| {
        catalog.with_equipment(EquipmentDefinition::new(id).with_capability(capability))
    })
}

/// Both top-level components in stock.
pub(crate) fn stock_for_drive_unit() -> Inventory {
    Inventory::new()
        .with_item(ItemInstance::new("gearbox", 1))
        .with_item(ItemInstance::new("motor", 1))
}

/// Raw materials for one drive unit built from scratch.
pub(crate) fn raw_stock_for_drive_unit() -> Inventory {
    Inventory::new()
        .with_item(ItemInstance::new("steel_bar", 6))
        .with_item(ItemInstance::new("copper_wire", 3))
        .with_item(ItemInstance::new("polymer_resin", 4))
}

/// Components for one gearbox.
pub(crate) fn stock_for_gearbox() -> Inventory {
    Inventory::new()
        .with_item(ItemInstance::new("gear", 2))
        .with_item(ItemInstance::new("shaft", 1))
        .with_item(ItemInstance::new("housing", 1))
}
