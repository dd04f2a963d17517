/// Guest memory made of fixed regions with per-region write permission

use std::sync::RwLock;

use gdbserver::Access;

use crate::SimError;

struct Region {
    base: u32,
    size: u32,
    writable: bool,
    data: RwLock<Vec<u8>>,
}

impl Region {
    fn contains(&self, addr: u32) -> bool {
        addr >= self.base && addr - self.base < self.size
    }

    fn offset(&self, addr: u32) -> usize {
        (addr - self.base) as usize
    }
}

#[derive(Default)]
pub struct GuestMemory {
    regions: Vec<Region>,
}

impl GuestMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `size` zeroed bytes at `base`
    pub fn map(&mut self, base: u32, size: u32, writable: bool) -> Result<(), SimError> {
        if size == 0 {
            return Err(SimError::EmptyRegion(base));
        }
        let last = base
            .checked_add(size - 1)
            .ok_or(SimError::RegionOverflow { base, size })?;
        if self
            .regions
            .iter()
            .any(|r| r.contains(base) || r.contains(last) || (base <= r.base && r.base <= last))
        {
            return Err(SimError::RegionOverlap { base, size });
        }

        log::debug!(
            "Mapping {:#x}..={:#x} ({})",
            base,
            last,
            if writable { "rw" } else { "ro" }
        );
        self.regions.push(Region {
            base,
            size,
            writable,
            data: RwLock::new(vec![0; size as usize]),
        });
        Ok(())
    }

    fn region(&self, addr: u32) -> Option<&Region> {
        self.regions.iter().find(|r| r.contains(addr))
    }

    pub fn is_valid(&self, addr: u32, access: Access) -> bool {
        match self.region(addr) {
            Some(region) => access == Access::Read || region.writable,
            None => false,
        }
    }

    pub fn read_u8(&self, addr: u32) -> Option<u8> {
        let region = self.region(addr)?;
        let data = region.data.read().unwrap_or_else(|e| e.into_inner());
        Some(data[region.offset(addr)])
    }

    /// Store a byte, honouring the region's permission
    pub fn write_u8(&self, addr: u32, value: u8) -> bool {
        match self.region(addr) {
            Some(region) if region.writable => {
                let mut data = region.data.write().unwrap_or_else(|e| e.into_inner());
                let offset = region.offset(addr);
                data[offset] = value;
                true
            }
            _ => false,
        }
    }

    /// Big-endian instruction fetch
    pub fn read_u32(&self, addr: u32) -> Option<u32> {
        let mut word = [0u8; 4];
        for (i, byte) in word.iter_mut().enumerate() {
            *byte = self.read_u8(addr.checked_add(i as u32)?)?;
        }
        Some(u32::from_be_bytes(word))
    }

    /// Copy an image into memory regardless of permissions
    pub fn load(&self, addr: u32, bytes: &[u8]) -> Result<(), SimError> {
        let region = self.region(addr).ok_or(SimError::Unmapped(addr))?;
        let offset = region.offset(addr);
        if bytes.len() > region.size as usize - offset {
            return Err(SimError::Unmapped(addr.wrapping_add(bytes.len() as u32)));
        }
        let mut data = region.data.write().unwrap_or_else(|e| e.into_inner());
        data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}
