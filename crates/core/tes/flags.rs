use crate::codec::flags::FeatureFlags;
use crate::model::FeatureKind;
use bitflags::bitflags;

bitflags! {
    /// Leading byte of a feature body in a TES stream.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct BodyFlags: u8 {
        const TAGS_CHANGED = 1;
        /// The tags are a shared table number rather than an inline table.
        const SHARED_TAGS = 1 << 1;
        const RELATIONS_CHANGED = 1 << 2;
        const GEOMETRY_CHANGED = 1 << 3;
        /// Ways and relations: node or member list follows.
        const MEMBERS_CHANGED = 1 << 4;
        const AREA = 1 << 5;
        const MULTITILE_WEST = 1 << 6;
        const MULTITILE_NORTH = 1 << 7;
    }
}

impl BodyFlags {
    /// Nodes reuse the members bit to mark way membership.
    pub const BELONGS_TO_WAY: BodyFlags = BodyFlags::MEMBERS_CHANGED;

    pub fn from_feature(kind: FeatureKind, flags: FeatureFlags) -> Self {
        let mut body = BodyFlags::empty();
        body.set(BodyFlags::AREA, flags.contains(FeatureFlags::AREA));
        body.set(
            BodyFlags::MULTITILE_WEST,
            flags.contains(FeatureFlags::MULTITILE_WEST),
        );
        body.set(
            BodyFlags::MULTITILE_NORTH,
            flags.contains(FeatureFlags::MULTITILE_NORTH),
        );
        if kind == FeatureKind::Node && flags.contains(FeatureFlags::WAYNODE) {
            body |= BodyFlags::BELONGS_TO_WAY;
        }
        body
    }

    /// Stored feature flags carried by this byte.
    pub fn feature_flags(self, kind: FeatureKind) -> FeatureFlags {
        let mut flags = FeatureFlags::empty();
        flags.set(FeatureFlags::AREA, self.contains(BodyFlags::AREA));
        flags.set(
            FeatureFlags::MULTITILE_WEST,
            self.contains(BodyFlags::MULTITILE_WEST),
        );
        flags.set(
            FeatureFlags::MULTITILE_NORTH,
            self.contains(BodyFlags::MULTITILE_NORTH),
        );
        if kind == FeatureKind::Node && self.contains(BodyFlags::BELONGS_TO_WAY) {
            flags |= FeatureFlags::WAYNODE;
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_way_membership_only_for_nodes() {
        let flags = FeatureFlags::WAYNODE | FeatureFlags::AREA;
        let node = BodyFlags::from_feature(FeatureKind::Node, flags);
        assert!(node.contains(BodyFlags::BELONGS_TO_WAY));
        assert_eq!(node.feature_flags(FeatureKind::Node), flags);

        let way = BodyFlags::from_feature(FeatureKind::Way, flags);
        assert!(!way.contains(BodyFlags::MEMBERS_CHANGED));
        assert_eq!(way.feature_flags(FeatureKind::Way), FeatureFlags::AREA);
    }
}
