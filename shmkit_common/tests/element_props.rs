//! Property tests for the element size table.

use proptest::prelude::*;
use shmkit_common::shm::element::ElementType;

proptest! {
    #[test]
    fn known_tags_have_power_of_two_width(tag in 0u8..10) {
        let ty = ElementType::from_u8(tag).unwrap();
        let width = ty.width();
        prop_assert!(width.is_power_of_two());
        prop_assert!(width <= 8);
        prop_assert_eq!(ty as u8, tag);
    }

    #[test]
    fn unknown_tags_are_rejected(tag in 10u8..=255) {
        prop_assert!(ElementType::from_u8(tag).is_none());
    }

    #[test]
    fn count_survives_byte_conversion(tag in 0u8..10, count in 0usize..1_000_000) {
        let ty = ElementType::from_u8(tag).unwrap();
        let bytes = ty.byte_len(count).unwrap();
        prop_assert_eq!(ty.count_for(bytes), count);
    }

    #[test]
    fn name_roundtrip(tag in 0u8..10) {
        let ty = ElementType::from_u8(tag).unwrap();
        prop_assert_eq!(ty.name().parse::<ElementType>().unwrap(), ty);
    }
}
