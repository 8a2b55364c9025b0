use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;
use tradhelm_shared::{Building, FeatureId};

use crate::map::surface::{FeatureState, RenderingSurface};

/// UI-driven highlight inputs for one source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresentationState {
    pub selected: Option<FeatureId>,
    pub hovered: Option<FeatureId>,
    pub loaded: BTreeSet<FeatureId>,
    pub building: Option<(FeatureId, Building)>,
}

impl PresentationState {
    pub fn new(loaded: impl IntoIterator<Item = FeatureId>) -> Self {
        Self {
            loaded: loaded.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_selected(mut self, id: Option<FeatureId>) -> Self {
        self.selected = id;
        self
    }

    pub fn with_hovered(mut self, id: Option<FeatureId>) -> Self {
        self.hovered = id;
        self
    }

    pub fn with_building(mut self, placement: Option<(FeatureId, Building)>) -> Self {
        self.building = placement;
        self
    }

    /// Full flag set for every loaded feature. Only loaded features carry state, and a
    /// feature that is both selected and hovered is reported as selected only.
    pub fn flags(&self) -> BTreeMap<FeatureId, FeatureState> {
        let mut flags: BTreeMap<FeatureId, FeatureState> = self
            .loaded
            .iter()
            .map(|id| {
                (
                    id.clone(),
                    FeatureState {
                        selected: Some(false),
                        hovered: Some(false),
                        loaded: Some(true),
                        building: None,
                    },
                )
            })
            .collect();

        if let Some(state) = self.selected.as_ref().and_then(|id| flags.get_mut(id)) {
            state.selected = Some(true);
        }
        if let Some(hovered) = &self.hovered
            && self.selected.as_ref() != Some(hovered)
            && let Some(state) = flags.get_mut(hovered)
        {
            state.hovered = Some(true);
        }
        if let Some((id, building)) = &self.building
            && let Some(state) = flags.get_mut(id)
        {
            state.building = Some(*building);
        }
        flags
    }
}

/// Clear-then-reapply: wipes every flag on `source_id`, then writes the full flag set
/// of each loaded feature. O(loaded) per call, and no stale flag can survive it.
/// Returns the number of features written.
pub fn reconcile<S: RenderingSurface + ?Sized>(
    surface: &S,
    source_id: &str,
    presentation: &PresentationState,
) -> usize {
    surface.remove_feature_state(source_id, None);
    let flags = presentation.flags();
    for (id, state) in &flags {
        surface.set_feature_state(source_id, id, state);
    }
    debug!(
        source = source_id,
        features = flags.len(),
        selected = ?presentation.selected,
        hovered = ?presentation.hovered,
        "feature state reconciled"
    );
    flags.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::testing::RecordingSurface;

    fn id(s: &str) -> FeatureId {
        FeatureId::from(s)
    }

    fn abc() -> PresentationState {
        PresentationState::new([id("A"), id("B"), id("C")])
    }

    #[test]
    fn selection_and_hover_land_on_distinct_features() {
        let surface = RecordingSurface::loaded();
        let presentation = abc()
            .with_selected(Some(id("B")))
            .with_hovered(Some(id("C")));

        assert_eq!(reconcile(&*surface, "squares", &presentation), 3);

        let b = surface.state_of("squares", &id("B")).expect("B has state");
        assert!(b.is_selected() && !b.is_hovered() && b.is_loaded());
        let c = surface.state_of("squares", &id("C")).expect("C has state");
        assert!(c.is_hovered() && !c.is_selected());
        let a = surface.state_of("squares", &id("A")).expect("A has state");
        assert!(a.is_loaded() && !a.is_selected() && !a.is_hovered());
        assert_eq!(surface.state_of("squares", &id("D")), None);
    }

    #[test]
    fn moving_selection_clears_the_previous_flag() {
        let surface = RecordingSurface::loaded();
        reconcile(
            &*surface,
            "squares",
            &abc().with_selected(Some(id("B"))).with_hovered(Some(id("C"))),
        );
        reconcile(
            &*surface,
            "squares",
            &abc().with_selected(Some(id("A"))).with_hovered(Some(id("C"))),
        );

        assert!(surface.state_of("squares", &id("A")).is_some_and(|s| s.is_selected()));
        assert!(!surface.state_of("squares", &id("B")).is_some_and(|s| s.is_selected()));
        assert!(surface.state_of("squares", &id("C")).is_some_and(|s| s.is_hovered()));
    }

    #[test]
    fn selection_wins_over_hover_on_the_same_feature() {
        let flags = abc()
            .with_selected(Some(id("B")))
            .with_hovered(Some(id("B")))
            .flags();
        let b = flags[&id("B")];
        assert!(b.is_selected());
        assert!(!b.is_hovered());
        assert!(flags.values().all(|s| !s.is_hovered()));
    }

    #[test]
    fn features_leaving_the_loaded_set_lose_all_state() {
        let surface = RecordingSurface::loaded();
        reconcile(&*surface, "squares", &abc().with_selected(Some(id("A"))));
        reconcile(
            &*surface,
            "squares",
            &PresentationState::new([id("B")]).with_selected(Some(id("A"))),
        );

        assert_eq!(surface.state_of("squares", &id("A")), None);
        assert_eq!(surface.stateful_features("squares"), 1);
    }

    #[test]
    fn building_follows_its_square_and_is_cleared_with_it() {
        let surface = RecordingSurface::loaded();
        reconcile(
            &*surface,
            "squares",
            &abc()
                .with_selected(Some(id("B")))
                .with_building(Some((id("B"), Building::Mine))),
        );
        let b = surface.state_of("squares", &id("B")).expect("B has state");
        assert_eq!(b.building, Some(Building::Mine));
        assert_eq!(
            surface.state_of("squares", &id("A")).and_then(|s| s.building),
            None
        );

        reconcile(&*surface, "squares", &abc().with_selected(Some(id("C"))));
        assert_eq!(
            surface.state_of("squares", &id("B")).and_then(|s| s.building),
            None
        );

        let outside = abc().with_building(Some((id("Z"), Building::Farm))).flags();
        assert!(outside.values().all(|s| s.building.is_none()));
    }

    #[test]
    fn reconcile_leaves_other_sources_alone() {
        let surface = RecordingSurface::loaded();
        reconcile(&*surface, "countries", &PresentationState::new([id("X")]));
        reconcile(&*surface, "squares", &PresentationState::default());
        assert_eq!(surface.stateful_features("countries"), 1);
    }
}
