//! Item definitions and instances.
//!
//! A [`BaseItem`] is the immutable catalog definition (tier, recipe, value).
//! An [`ItemInstance`] is a concrete, ownable quantity of a base item with a
//! quality and a set of tags. Instances move between inventories by value;
//! they are never copied into two owners.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use super::CapabilityRequirement;
use crate::error::{FabricationError, Result};

/// Tag applied to components recovered by disassembly.
pub const SALVAGED_TAG: &str = "salvaged";

/// Manufacturing tier. Governs which operations are legal on an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    /// Bought or mined; never manufactured.
    RawMaterial,
    /// Produced from raw materials by a shaping operation.
    ShapedMaterial,
    /// Produced from several components by an assembly operation.
    Assembly,
}

impl Tier {
    /// Whether this is the raw-material tier.
    pub fn is_raw(self) -> bool {
        self == Tier::RawMaterial
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::RawMaterial => write!(f, "raw material"),
            Tier::ShapedMaterial => write!(f, "shaped material"),
            Tier::Assembly => write!(f, "assembly"),
        }
    }
}

/// Damage condition carried on an instance as a tag.
///
/// Declaration order is the fixed treatment precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Condition {
    Contaminated,
    Cracked,
    Corroded,
    Worn,
}

impl Condition {
    /// All known conditions in precedence order.
    pub const ALL: [Condition; 4] = [
        Condition::Contaminated,
        Condition::Cracked,
        Condition::Corroded,
        Condition::Worn,
    ];

    /// The tag string carried on instances.
    pub fn tag(self) -> &'static str {
        match self {
            Condition::Contaminated => "contaminated",
            Condition::Cracked => "cracked",
            Condition::Corroded => "corroded",
            Condition::Worn => "worn",
        }
    }

    /// Parses a tag string.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.tag() == tag)
    }

    /// Conditions that must be treated first when also present.
    pub fn prerequisites(self) -> &'static [Condition] {
        match self {
            Condition::Cracked => &[Condition::Corroded],
            Condition::Corroded => &[Condition::Contaminated],
            Condition::Contaminated | Condition::Worn => &[],
        }
    }

    /// Whether the condition needs a treatment operation.
    ///
    /// Wear only lowers quality and yield.
    pub fn needs_treatment(self) -> bool {
        !matches!(self, Condition::Worn)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One line of a recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeComponent {
    /// Component base item id.
    pub item_id: String,
    /// Units needed per unit of the parent.
    pub quantity: u32,
    /// Tags an instance must carry to be used.
    pub required_tags: Vec<String>,
    /// Highest quality accepted (and produced) for this component.
    pub quality_ceiling: Option<f64>,
}

impl RecipeComponent {
    /// Creates a recipe line.
    pub fn new(item_id: impl Into<String>, quantity: u32) -> Self {
        Self {
            item_id: item_id.into(),
            quantity,
            required_tags: Vec::new(),
            quality_ceiling: None,
        }
    }

    /// Adds a required tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.required_tags.push(tag.into());
        self
    }

    /// Sets the quality ceiling.
    pub fn with_quality_ceiling(mut self, ceiling: f64) -> Self {
        self.quality_ceiling = Some(ceiling);
        self
    }

    /// Filter matching instances usable for this line.
    pub fn filter(&self) -> ItemFilter<'_> {
        ItemFilter {
            item_id: &self.item_id,
            tags: &self.required_tags,
            quality_ceiling: self.quality_ceiling,
        }
    }
}

/// Immutable catalog definition of a material, component or product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseItem {
    /// Unique item id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Manufacturing tier.
    pub tier: Tier,
    /// Components consumed to make one unit. Empty for raw materials.
    pub recipe: Vec<RecipeComponent>,
    /// Descriptive tags.
    pub tags: Vec<String>,
    /// Base value (currency-free).
    pub base_value: f64,
    /// Processing time per unit (ms).
    pub build_time_ms: i64,
    /// Equipment requirement overriding the per-kind default.
    pub capability: Option<CapabilityRequirement>,
}

impl BaseItem {
    /// Creates an item of the given tier.
    pub fn new(id: impl Into<String>, tier: Tier) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            tier,
            recipe: Vec::new(),
            tags: Vec::new(),
            base_value: 0.0,
            build_time_ms: 60_000,
            capability: None,
        }
    }

    /// Creates a raw material.
    pub fn raw(id: impl Into<String>) -> Self {
        Self::new(id, Tier::RawMaterial)
    }

    /// Creates a shaped material.
    pub fn shaped(id: impl Into<String>) -> Self {
        Self::new(id, Tier::ShapedMaterial)
    }

    /// Creates an assembly.
    pub fn assembly(id: impl Into<String>) -> Self {
        Self::new(id, Tier::Assembly)
    }

    /// Sets the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Adds a recipe line.
    pub fn with_component(mut self, component: RecipeComponent) -> Self {
        self.recipe.push(component);
        self
    }

    /// Shorthand for an untagged recipe line.
    pub fn with_input(self, item_id: impl Into<String>, quantity: u32) -> Self {
        self.with_component(RecipeComponent::new(item_id, quantity))
    }

    /// Adds a descriptive tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Sets the base value.
    pub fn with_value(mut self, value: f64) -> Self {
        self.base_value = value;
        self
    }

    /// Sets the per-unit processing time.
    pub fn with_build_time(mut self, ms: i64) -> Self {
        self.build_time_ms = ms;
        self
    }

    /// Overrides the equipment requirement.
    pub fn with_capability(mut self, requirement: CapabilityRequirement) -> Self {
        self.capability = Some(requirement);
        self
    }

    /// Whether an operation can produce this item.
    pub fn is_manufacturable(&self) -> bool {
        !self.tier.is_raw() && !self.recipe.is_empty()
    }
}

/// A concrete quantity of a base item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemInstance {
    /// Base item id.
    pub item_id: String,
    /// Units in this instance.
    pub quantity: u32,
    /// Quality 0..=100.
    pub quality: f64,
    /// Condition and provenance tags.
    pub tags: BTreeSet<String>,
}

impl ItemInstance {
    /// Creates a pristine instance (quality 100, no tags).
    pub fn new(item_id: impl Into<String>, quantity: u32) -> Self {
        Self {
            item_id: item_id.into(),
            quantity,
            quality: 100.0,
            tags: BTreeSet::new(),
        }
    }

    /// Sets the quality, clamped to 0..=100.
    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality = quality.clamp(0.0, 100.0);
        self
    }

    /// Adds a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Adds a condition tag.
    pub fn with_condition(self, condition: Condition) -> Self {
        self.with_tag(condition.tag())
    }

    /// Conditions present on this instance, in precedence order.
    pub fn conditions(&self) -> Vec<Condition> {
        let mut found: Vec<Condition> = self
            .tags
            .iter()
            .filter_map(|t| Condition::from_tag(t))
            .collect();
        found.sort();
        found
    }

    /// Whether the instance carries every tag in `tags`.
    pub fn has_tags(&self, tags: &[String]) -> bool {
        tags.iter().all(|t| self.tags.contains(t))
    }

    /// Whether two instances can share a stack.
    pub fn stacks_with(&self, other: &ItemInstance) -> bool {
        self.item_id == other.item_id
            && (self.quality - other.quality).abs() < 1e-9
            && self.tags == other.tags
    }
}

/// Selects instances by id, required tags and quality ceiling.
#[derive(Debug, Clone, Copy)]
pub struct ItemFilter<'a> {
    pub item_id: &'a str,
    pub tags: &'a [String],
    pub quality_ceiling: Option<f64>,
}

impl<'a> ItemFilter<'a> {
    /// Matches any instance of `item_id`.
    pub fn any(item_id: &'a str) -> Self {
        Self {
            item_id,
            tags: &[],
            quality_ceiling: None,
        }
    }

    /// Whether `instance` passes this filter.
    pub fn matches(&self, instance: &ItemInstance) -> bool {
        instance.item_id == self.item_id
            && instance.has_tags(self.tags)
            && self
                .quality_ceiling
                .map_or(true, |ceiling| instance.quality <= ceiling + 1e-9)
    }
}

/// Read-only catalog of base items.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemCatalog {
    items: HashMap<String, BaseItem>,
}

impl ItemCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an item (builder).
    pub fn with_item(mut self, item: BaseItem) -> Self {
        self.insert(item);
        self
    }

    /// Adds or replaces an item.
    pub fn insert(&mut self, item: BaseItem) {
        self.items.insert(item.id.clone(), item);
    }

    /// Looks up an item, failing with [`FabricationError::UnknownItem`].
    pub fn get(&self, id: &str) -> Result<&BaseItem> {
        self.items
            .get(id)
            .ok_or_else(|| FabricationError::UnknownItem(id.to_string()))
    }

    /// Whether the catalog defines `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    /// Tier of `id`, if defined.
    pub fn tier_of(&self, id: &str) -> Option<Tier> {
        self.items.get(id).map(|i| i.tier)
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_item_builder() {
        let gear = BaseItem::shaped("gear")
            .with_name("Spur Gear")
            .with_input("steel_bar", 2)
            .with_value(12.0)
            .with_build_time(30_000);

        assert_eq!(gear.tier, Tier::ShapedMaterial);
        assert_eq!(gear.name, "Spur Gear");
        assert_eq!(gear.recipe.len(), 1);
        assert_eq!(gear.recipe[0].quantity, 2);
        assert!(gear.is_manufacturable());
        assert!(!BaseItem::raw("steel_bar").is_manufacturable());
    }

    #[test]
    fn test_condition_tags() {
        for c in Condition::ALL {
            assert_eq!(Condition::from_tag(c.tag()), Some(c));
        }
        assert_eq!(Condition::from_tag("shiny"), None);
        assert!(!Condition::Worn.needs_treatment());
        assert!(Condition::Cracked.needs_treatment());
    }

    #[test]
    fn test_instance_conditions_sorted() {
        let inst = ItemInstance::new("gearbox", 1)
            .with_condition(Condition::Worn)
            .with_condition(Condition::Contaminated)
            .with_tag("vintage");
        assert_eq!(
            inst.conditions(),
            vec![Condition::Contaminated, Condition::Worn]
        );
    }

    #[test]
    fn test_quality_clamped() {
        assert_eq!(ItemInstance::new("x", 1).with_quality(140.0).quality, 100.0);
        assert_eq!(ItemInstance::new("x", 1).with_quality(-3.0).quality, 0.0);
    }

    #[test]
    fn test_filter_matching() {
        let tags = vec!["precision".to_string()];
        let filter = ItemFilter {
            item_id: "gear",
            tags: &tags,
            quality_ceiling: Some(80.0),
        };
        let ok = ItemInstance::new("gear", 1)
            .with_quality(75.0)
            .with_tag("precision");
        let too_good = ItemInstance::new("gear", 1).with_tag("precision");
        let untagged = ItemInstance::new("gear", 1).with_quality(50.0);
        let wrong_id = ItemInstance::new("shaft", 1)
            .with_quality(50.0)
            .with_tag("precision");

        assert!(filter.matches(&ok));
        assert!(!filter.matches(&too_good));
        assert!(!filter.matches(&untagged));
        assert!(!filter.matches(&wrong_id));
        assert!(ItemFilter::any("gear").matches(&too_good));
    }

    #[test]
    fn test_stacks_with() {
        let a = ItemInstance::new("gear", 2).with_quality(90.0);
        let b = ItemInstance::new("gear", 5).with_quality(90.0);
        let c = ItemInstance::new("gear", 5)
            .with_quality(90.0)
            .with_tag(SALVAGED_TAG);
        assert!(a.stacks_with(&b));
        assert!(!a.stacks_with(&c));
    }

    #[test]
    fn test_catalog_lookup() {
        let catalog = ItemCatalog::new()
            .with_item(BaseItem::raw("steel_bar"))
            .with_item(BaseItem::shaped("gear").with_input("steel_bar", 2));

        assert_eq!(catalog.len(), 2);
        assert!(catalog.contains("gear"));
        assert_eq!(catalog.tier_of("steel_bar"), Some(Tier::RawMaterial));
        assert_eq!(
            catalog.get("widget").unwrap_err(),
            FabricationError::UnknownItem("widget".into())
        );
    }
}
