//! State-machine evaluation of a winning superblock against the
//! caller's mount request.

use log::warn;

use crate::error::Error;
use crate::flags::*;
use crate::validate::Validated;


/// What the evaluator decided. The adjusted in-memory state travels in
/// `state`; the disk keeps its own copy until a dirty-mark or unmount
/// writes it back.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MountDecision {
    /// The handle must not accept writes.
    pub read_only: bool,
    /// Read-only was imposed by the volume, not requested by the caller.
    pub forced_ro: bool,
    /// The CLEAN to DIRTY transition must be persisted before the mount
    /// returns.
    pub dirty_mark: bool,
    /// The on-disk state was effectively dirty; reconstruction applies.
    pub was_dirty: bool,
    /// Anomalies tolerated so far.
    pub taint: u32,
    /// Adjusted in-memory state flags.
    pub state: u32,
}


/// Walks the precedence ladder over the on-disk state flags.
///
/// Security outranks availability, availability outranks persistence:
/// a pending wipe or a locked volume never mounts; a toxic, panicked or
/// torn volume mounts read-only; everything else decides only whether
/// the dirty transition is written.
pub fn evaluate(
    on_disk_state: u32,
    intent: MountIntent,
    split_dirty: bool,
    validated: &Validated,
) -> Result<MountDecision, Error>
{
    let flags = StateFlags(on_disk_state);

    if flags.has_pending_wipe() {
        return Err(Error::WipePending);
    }
    if flags.has_locked() {
        return Err(Error::VolumeLocked);
    }

    let mut state = on_disk_state;
    let mut forced_ro = false;
    let mut taint: u32 = 0;

    if flags.has_toxic() {
        warn!("volume marked toxic; forcing read-only");
        forced_ro = true;
    }
    if flags.has_panic() {
        warn!("volume carries a panic marker; forcing read-only");
        forced_ro = true;
    }

    if flags.is_torn() {
        // CLEAN and DIRTY at once: a torn flag write. Tolerated, noted.
        forced_ro = true;
        taint += 1;
        state &= !STATE_CLEAN;
    }

    if split_dirty || flags.has_unmounting() {
        // An interrupted unmount leaves either disagreeing replicas or
        // a stranded UNMOUNTING marker; both mean the session was dirty.
        state &= !STATE_CLEAN;
        state |= STATE_DIRTY;
    }

    if flags.has_needs_upgrade() || validated.needs_upgrade {
        forced_ro = true;
    }
    if validated.force_ro {
        forced_ro = true;
    }

    let read_only = forced_ro || intent.has_read_only();
    let was_dirty = StateFlags(state).has_dirty();

    let dirty_mark = !read_only && !intent.has_virtual();
    if dirty_mark {
        state &= !STATE_CLEAN;
        state |= STATE_DIRTY;
    }

    Ok(MountDecision {
        read_only,
        forced_ro,
        dirty_mark,
        was_dirty,
        taint,
        state,
    })
}


#[cfg(test)]
mod tests {
    use super::*;

    const BASE: u32 = STATE_CLEAN | STATE_METADATA_ZEROED;

    fn ok_validated() -> Validated
    {
        Validated::default()
    }

    #[test]
    fn clean_rw_mount_dirty_marks()
    {
        let d = evaluate(BASE, MountIntent(0), false, &ok_validated()).unwrap();

        assert!(!d.read_only);
        assert!(d.dirty_mark);
        assert!(!d.was_dirty);
        assert_eq!(d.taint, 0);
        assert!(StateFlags(d.state).has_dirty());
        assert!(!StateFlags(d.state).has_clean());
    }

    #[test]
    fn pending_wipe_outranks_locked()
    {
        let state = STATE_PENDING_WIPE | STATE_LOCKED | STATE_METADATA_ZEROED;

        assert_eq!(
            evaluate(state, MountIntent(0), false, &ok_validated()).unwrap_err(),
            Error::WipePending
        );
    }

    #[test]
    fn locked_volume_rejected()
    {
        let state = STATE_LOCKED | STATE_METADATA_ZEROED;

        assert_eq!(
            evaluate(state, MountIntent(0), false, &ok_validated()).unwrap_err(),
            Error::VolumeLocked
        );
    }

    #[test]
    fn toxic_forces_ro()
    {
        let d = evaluate(BASE | STATE_TOXIC, MountIntent(0), false, &ok_validated()).unwrap();

        assert!(d.read_only);
        assert!(d.forced_ro);
        assert!(!d.dirty_mark);
    }

    #[test]
    fn panic_forces_ro_and_skips_dirty_mark()
    {
        let d = evaluate(BASE | STATE_PANIC, MountIntent(0), false, &ok_validated()).unwrap();

        assert!(d.read_only);
        assert!(!d.dirty_mark);
    }

    #[test]
    fn torn_flags_force_ro_and_taint()
    {
        let state = STATE_CLEAN | STATE_DIRTY | STATE_METADATA_ZEROED;
        let d = evaluate(state, MountIntent(0), false, &ok_validated()).unwrap();

        assert!(d.read_only);
        assert_eq!(d.taint, 1);
        assert!(d.was_dirty);
    }

    #[test]
    fn split_brain_becomes_dirty()
    {
        let d = evaluate(BASE, MountIntent(0), true, &ok_validated()).unwrap();

        assert!(d.was_dirty);
        assert!(StateFlags(d.state).has_dirty());
        assert!(!StateFlags(d.state).has_clean());
        // Not a force-RO condition: the mount stays writable.
        assert!(!d.read_only);
    }

    #[test]
    fn unmounting_marker_is_retained_and_dirties()
    {
        let d = evaluate(BASE | STATE_UNMOUNTING, MountIntent(0), false, &ok_validated()).unwrap();

        assert!(d.was_dirty);
        assert!(StateFlags(d.state).has_unmounting());
        assert!(StateFlags(d.state).has_dirty());
    }

    #[test]
    fn needs_upgrade_forces_ro()
    {
        let d = evaluate(BASE | STATE_NEEDS_UPGRADE, MountIntent(0), false, &ok_validated()).unwrap();

        assert!(d.read_only);
        assert!(d.forced_ro);
    }

    #[test]
    fn unknown_ro_compat_forces_ro()
    {
        let v = Validated { force_ro: true, needs_upgrade: false };
        let d = evaluate(BASE, MountIntent(0), false, &v).unwrap();

        assert!(d.read_only);
        assert!(d.forced_ro);
    }

    #[test]
    fn requested_ro_is_not_forced()
    {
        let d = evaluate(BASE, MountIntent(INTENT_READ_ONLY), false, &ok_validated()).unwrap();

        assert!(d.read_only);
        assert!(!d.forced_ro);
        assert!(!d.dirty_mark);
        // The on-disk state is left exactly as found.
        assert!(StateFlags(d.state).has_clean());
    }

    #[test]
    fn virtual_mount_skips_dirty_mark_but_stays_writable()
    {
        let d = evaluate(BASE, MountIntent(INTENT_VIRTUAL), false, &ok_validated()).unwrap();

        assert!(!d.read_only);
        assert!(!d.dirty_mark);
    }
}
