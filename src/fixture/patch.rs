//! Binding fixture definitions to universes, addresses, and places in space.
use std::collections::HashMap;

use anyhow::{Result, anyhow, bail, ensure};
use glam::DVec3;
use itertools::Itertools;
use log::info;
use ordermap::OrderMap;

use super::{Fixture, FixtureDef, FixtureId, Head, HeadId, PatchedChannel, rotation_from_deg};
use crate::dmx::{DmxAddr, UNIVERSE_SIZE, UniverseId};
use crate::spatial::Placement;

/// Which patched channel occupies a universe slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelRef {
    pub head: HeadId,
    pub channel: usize,
    /// True if the slot is the fine byte of a 16-bit channel.
    pub fine: bool,
}

/// The set of patched fixtures and the universe slots they own.
///
/// Patching is transactional: a conflicting or invalid fixture is rejected
/// without disturbing existing state.
#[derive(Clone, Default, Debug)]
pub struct Patch {
    fixtures: OrderMap<FixtureId, Fixture>,
    slots: HashMap<(UniverseId, usize), ChannelRef>,
    next_id: usize,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Patch a fixture at the given universe, base address, and placement.
    ///
    /// Every channel the fixture declares must land on a free slot within the
    /// universe; otherwise the whole patch is rejected.
    pub fn patch(
        &mut self,
        def: &FixtureDef,
        universe: UniverseId,
        addr: DmxAddr,
        placement: Placement,
    ) -> Result<FixtureId> {
        def.validate()?;
        addr.validate()?;

        let id = FixtureId(self.next_id);
        let fixture = build_fixture(def, id, universe, addr, placement)?;

        // Claim slots only after the whole footprint checks out.
        let mut claimed: HashMap<(UniverseId, usize), ChannelRef> = HashMap::new();
        for head in &fixture.heads {
            for (channel_idx, channel) in head.channels.iter().enumerate() {
                for (slot, fine) in [(Some(channel.address), false), (channel.fine_address, true)]
                {
                    let Some(slot) = slot else { continue };
                    ensure!(
                        slot < UNIVERSE_SIZE,
                        "{} at {} runs off the end of universe {}",
                        def.name,
                        addr,
                        universe
                    );
                    let reference = ChannelRef {
                        head: head.id,
                        channel: channel_idx,
                        fine,
                    };
                    if let Some(existing) = self.slots.get(&(universe, slot)) {
                        let holder = &self.fixtures[&existing.head.fixture];
                        bail!(
                            "{} at {} overlaps at DMX address {} in universe {} with {} at {}",
                            def.name,
                            addr,
                            slot + 1,
                            universe,
                            holder.name,
                            holder.addr,
                        );
                    }
                    if claimed.insert((universe, slot), reference).is_some() {
                        bail!(
                            "{} declares DMX address {} in universe {} twice",
                            def.name,
                            slot + 1,
                            universe
                        );
                    }
                }
            }
        }

        info!("Patched {} at {} (universe {}).", def.name, addr, universe);
        self.slots.extend(claimed);
        self.fixtures.insert(id, fixture);
        self.next_id += 1;
        Ok(id)
    }

    pub fn fixture(&self, id: FixtureId) -> Result<&Fixture> {
        self.fixtures
            .get(&id)
            .ok_or_else(|| anyhow!("{id} is not patched"))
    }

    pub fn head(&self, id: HeadId) -> Result<&Head> {
        self.fixture(id.fixture)?
            .heads
            .get(id.index)
            .ok_or_else(|| anyhow!("{id} does not exist"))
    }

    /// The head and channel occupying a universe slot, if any.
    pub fn channel_at(&self, universe: UniverseId, slot: usize) -> Option<(&Head, &PatchedChannel)> {
        let reference = self.slots.get(&(universe, slot))?;
        let head = self.head(reference.head).ok()?;
        Some((head, &head.channels[reference.channel]))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fixture> {
        self.fixtures.values()
    }

    pub fn len(&self) -> usize {
        self.fixtures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixtures.is_empty()
    }

    /// Buffer count needed to cover every patched universe.
    pub fn universe_capacity(&self) -> usize {
        self.fixtures
            .values()
            .map(|f| f.universe + 1)
            .max()
            .unwrap_or(0)
    }

    /// Universes with at least one fixture patched, ascending.
    pub fn universes(&self) -> Vec<UniverseId> {
        self.fixtures
            .values()
            .map(|f| f.universe)
            .sorted()
            .dedup()
            .collect()
    }
}

fn build_fixture(
    def: &FixtureDef,
    id: FixtureId,
    universe: UniverseId,
    addr: DmxAddr,
    placement: Placement,
) -> Result<Fixture> {
    let mut heads = Vec::with_capacity(def.heads.len() + 1);

    // Head 0: the fixture's own channels at the fixture's placement.
    heads.push(Head {
        id: HeadId {
            fixture: id,
            index: 0,
        },
        universe,
        channels: patch_channels(&def.channels, addr),
        position: placement.position,
        rotation: placement.rotation,
        calibration: def.calibration,
    });

    for (i, head_def) in def.heads.iter().enumerate() {
        let local = Placement::new(
            DVec3::from_array(head_def.position),
            rotation_from_deg(head_def.rotation_deg),
        );
        let world = placement.child(&local);
        heads.push(Head {
            id: HeadId {
                fixture: id,
                index: i + 1,
            },
            universe,
            channels: patch_channels(&head_def.channels, addr),
            position: world.position,
            rotation: world.rotation,
            calibration: head_def.calibration,
        });
    }

    Ok(Fixture {
        id,
        name: def.name.clone(),
        universe,
        addr,
        placement,
        heads,
    })
}

fn patch_channels(specs: &[super::ChannelSpec], addr: DmxAddr) -> Vec<PatchedChannel> {
    specs
        .iter()
        .map(|spec| PatchedChannel {
            spec: spec.clone(),
            address: addr.index() + spec.offset - 1,
            fine_address: spec.fine_offset.map(|f| addr.index() + f - 1),
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fixture::defs;

    fn assert_fail_patch(
        patch: &mut Patch,
        def: &FixtureDef,
        universe: UniverseId,
        addr: usize,
        snippet: &str,
    ) {
        let before = patch.len();
        let Err(err) = patch.patch(def, universe, DmxAddr::new(addr), Placement::default()) else {
            panic!("patch didn't fail")
        };
        assert!(
            format!("{err:#}").contains(snippet),
            "error message didn't contain '{snippet}':\n{err:#}"
        );
        assert_eq!(before, patch.len(), "failed patch mutated state");
    }

    #[test]
    fn test_patch_ok() {
        let mut p = Patch::new();
        let rgb = p
            .patch(&defs::rgb(), 0, DmxAddr::new(1), Placement::default())
            .unwrap();
        let dimmer = p
            .patch(&defs::dimmer(), 0, DmxAddr::new(4), Placement::default())
            .unwrap();
        assert_eq!(2, p.len());
        assert_eq!(1, p.universe_capacity());

        let rgb_head = p.head(HeadId {
            fixture: rgb,
            index: 0,
        });
        assert_eq!(3, rgb_head.unwrap().color_channels().count());

        let (_, ch) = p.channel_at(0, 3).unwrap();
        assert_eq!(3, ch.address);
        assert_eq!(
            dimmer,
            p.channel_at(0, 3).unwrap().0.id.fixture,
        );
        assert!(p.channel_at(0, 4).is_none());
        assert!(p.channel_at(1, 0).is_none());
    }

    #[test]
    fn test_collision_rejected() {
        let mut p = Patch::new();
        p.patch(&defs::rgb(), 0, DmxAddr::new(1), Placement::default())
            .unwrap();
        assert_fail_patch(
            &mut p,
            &defs::dimmer(),
            0,
            2,
            "dimmer at 2 overlaps at DMX address 2 in universe 0 with rgb at 1",
        );
        // The same address in another universe is fine.
        assert!(
            p.patch(&defs::dimmer(), 1, DmxAddr::new(2), Placement::default())
                .is_ok()
        );
        assert_eq!(2, p.universe_capacity());
        assert_eq!(vec![0, 1], p.universes());
    }

    #[test]
    fn test_end_of_universe_rejected() {
        let mut p = Patch::new();
        assert_fail_patch(
            &mut p,
            &defs::rgb(),
            0,
            511,
            "rgb at 511 runs off the end of universe 0",
        );
        assert!(
            p.patch(&defs::rgb(), 0, DmxAddr::new(510), Placement::default())
                .is_ok()
        );
    }

    #[test]
    fn test_bad_addresses_rejected() {
        let mut p = Patch::new();
        assert_fail_patch(&mut p, &defs::dimmer(), 0, 0, "invalid DMX address 0");
        assert_fail_patch(&mut p, &defs::dimmer(), 0, 513, "invalid DMX address 513");
    }

    #[test]
    fn test_internal_overlap_rejected() {
        use crate::fixture::{ChannelKind, ChannelSpec};
        let def = FixtureDef {
            name: "broken".to_string(),
            channels: vec![
                ChannelSpec::new(ChannelKind::Pan, 1).with_fine(2),
                ChannelSpec::new(ChannelKind::Dimmer, 2),
            ],
            ..Default::default()
        };
        let mut p = Patch::new();
        assert_fail_patch(
            &mut p,
            &def,
            0,
            1,
            "broken declares DMX address 2 in universe 0 twice",
        );
    }

    #[test]
    fn test_head_placement_composes() {
        use std::f64::consts::FRAC_PI_2;

        let def = defs::led_bar();
        let mut p = Patch::new();
        // Rotate the bar 90 degrees about y; cell offsets along x swing to -z.
        let placement = Placement::new(
            DVec3::new(0.0, 2.0, 0.0),
            glam::DMat3::from_rotation_y(FRAC_PI_2),
        );
        let id = p.patch(&def, 0, DmxAddr::new(1), placement).unwrap();
        let f = p.fixture(id).unwrap();
        // Head 0 + one head per cell.
        assert_eq!(def.heads.len() + 1, f.heads.len());
        let cell = &f.heads[2];
        let local_x = def.heads[1].position[0];
        assert!((cell.position.x - 0.0).abs() < 1e-9);
        assert!((cell.position.y - 2.0).abs() < 1e-9);
        assert!((cell.position.z + local_x).abs() < 1e-9);
    }
}
