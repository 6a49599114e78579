//! Property tests for the volume path scheme.

use fvde_core::testing::{patterned_volume, MemoryVolume};
use fvde_core::{FileSystemModel, FvdeError, PathPrefix, VolumeIndex};
use proptest::prelude::*;

fn model_with_volumes(count: usize) -> FileSystemModel {
    let model = FileSystemModel::with_prefix(PathPrefix::posix());
    for _ in 0..count {
        model.append_volume(MemoryVolume::unlocked(patterned_volume(8)).into_boxed());
    }
    model
}

proptest! {
    #[test]
    fn resolve_inverts_path_for(index in 0usize..999) {
        let prefix = PathPrefix::posix();
        let path = prefix.path_for(index);
        prop_assert_eq!(prefix.resolve(&path), Some(VolumeIndex::Volume(index)));
        prop_assert_eq!(path.len() + 1, prefix.required_size(index));
    }

    #[test]
    fn windows_prefix_ignores_case(index in 0usize..999, upper in any::<bool>()) {
        let prefix = PathPrefix::windows();
        let path = if upper {
            prefix.path_for(index).to_uppercase()
        } else {
            prefix.path_for(index).to_lowercase()
        };
        prop_assert_eq!(prefix.resolve(&path), Some(VolumeIndex::Volume(index)));
    }

    #[test]
    fn resolve_never_panics(path in "\\PC{0,16}") {
        let _ = PathPrefix::posix().resolve(&path);
        let _ = PathPrefix::windows().resolve(&path);
    }

    #[test]
    fn model_bounds_resolution_by_volume_count(count in 0usize..8, index in 0usize..16) {
        let model = model_with_volumes(count);
        let path = PathPrefix::posix().path_for(index);
        let resolved = model.resolve_path(&path);
        if index < count {
            prop_assert_eq!(resolved.ok(), Some(VolumeIndex::Volume(index)));
        } else {
            prop_assert!(matches!(resolved, Err(FvdeError::NotFound(_))));
        }
    }

    #[test]
    fn written_path_fits_exactly(index in 0usize..999, slack in 0usize..4) {
        let model = model_with_volumes(1);
        let required = PathPrefix::posix().required_size(index);
        let mut buf = vec![0xffu8; required + slack];
        let written = model.write_path_from_index(index, &mut buf).unwrap();
        prop_assert_eq!(written, required - 1);
        prop_assert_eq!(buf[written], 0);

        let mut short = vec![0u8; required - 1];
        let is_too_small = matches!(
            model.write_path_from_index(index, &mut short),
            Err(FvdeError::BufferTooSmall { .. })
        );
        prop_assert!(is_too_small);
    }
}
