//! The `VTY` descriptor type (spec 4.4, VTY type id resolved to `0x050` in
//! section 9). Unlike pipes and shared-memory segments, VTYs are not
//! created by `open` — a fixed small number already exist
//! ([`nyx_tty::MAX_VTYS`]) and `open` only selects one by index, the way
//! `original_source/src/kernel/descriptor/vty.cpp`'s `open_vty` resolves
//! `a0` against its static VTY table.

use nyx_tty::VtyTable;

use super::DescError;

/// `open(type=Vty, a0=index, a1=_, a2=_)`. Fails with [`DescError::NotFound`]
/// if `index` is out of range.
pub fn open(table: &VtyTable, index: u64) -> Result<usize, DescError> {
    let index = index as usize;
    if table.get(index).is_none() {
        return Err(DescError::NotFound);
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_valid_index() {
        let table = VtyTable::new();
        assert_eq!(open(&table, 0).unwrap(), 0);
    }

    #[test]
    fn open_out_of_range_index_fails() {
        let table = VtyTable::new();
        assert_eq!(open(&table, nyx_tty::MAX_VTYS as u64).unwrap_err(), DescError::NotFound);
    }
}
