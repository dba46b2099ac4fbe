use super::SD_SECTOR_SIZE;

pub const SD_CSD_SIZE: usize = 16;

const CSD_STRUCTURE_V1: u32 = 0;
const CSD_STRUCTURE_V2: u32 = 1;
const SECTOR_SHIFT: u32 = 9;
// CSD v2 counts capacity in 512 KiB units.
const CSD_V2_UNIT_SECTOR_SHIFT: u32 = 10;

/// Extracts bits `msb..=lsb` of a big-endian register, numbered the way the
/// SD register tables do: bit 0 is the low bit of the last byte.
///
/// Fields are at most 32 bits wide.
pub(crate) fn register_bits(reg: &[u8], msb: u32, lsb: u32) -> u32 {
    let top = reg.len() as u32 * 8 - 1;
    let first = ((top - msb) / 8) as usize;
    let last = ((top - lsb) / 8) as usize;
    let window = reg[first..=last]
        .iter()
        .fold(0u64, |acc, &byte| (acc << 8) | u64::from(byte));
    let shift = lsb - (reg.len() - 1 - last) as u32 * 8;
    let mask = (1u64 << (msb - lsb + 1)) - 1;
    ((window >> shift) & mask) as u32
}

fn csd_sectors(csd: &[u8; SD_CSD_SIZE]) -> Option<u64> {
    match register_bits(csd, 127, 126) {
        CSD_STRUCTURE_V1 => {
            // (C_SIZE + 1) << (C_SIZE_MULT + 2) blocks of 1 << READ_BL_LEN bytes
            let blocks = u64::from(register_bits(csd, 73, 62)) + 1;
            let block_shift = register_bits(csd, 49, 47) + 2 + register_bits(csd, 83, 80);
            Some(blocks << block_shift.checked_sub(SECTOR_SHIFT)?)
        }
        CSD_STRUCTURE_V2 => {
            let units = u64::from(register_bits(csd, 69, 48)) + 1;
            Some(units << CSD_V2_UNIT_SECTOR_SHIFT)
        }
        _ => None,
    }
}

pub fn csd_capacity_bytes(csd: &[u8; SD_CSD_SIZE]) -> Option<u64> {
    csd_sectors(csd)?.checked_mul(SD_SECTOR_SIZE as u64)
}

pub fn csd_sector_count(csd: &[u8; SD_CSD_SIZE]) -> Option<u32> {
    u32::try_from(csd_sectors(csd)?).ok()
}
