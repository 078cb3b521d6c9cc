const VENDOR_OPENMOKO: u16 = 0x1d50;
const VENDOR_FIC: u16 = 0x1457;
const VENDOR_VOTI: u16 = 0x16c0;
const VENDOR_LEAFLABS: u16 = 0x1eaf;
const VENDOR_SIEMENS: u16 = 0x0908;
const VENDOR_MIDIMAN: u16 = 0x0763;

const PRODUCT_FREERUNNER_FIRST: u16 = 0x5117;
const PRODUCT_FREERUNNER_LAST: u16 = 0x5126;
const PRODUCT_OPENPCD: u16 = 0x076b;
const PRODUCT_MAPLE3: u16 = 0x0003;
const PRODUCT_PXM40: u16 = 0x02c4;
const PRODUCT_PXM50: u16 = 0x02c5;
const PRODUCT_TRANSIT: u16 = 0x2806;

/// Known deviations of a device from the DFU specification
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Quirks(u16);

impl Quirks {
    /// Ignore `bwPollTimeout` and use [crate::DEFAULT_POLL_TIMEOUT]
    pub const POLL_TIMEOUT: Quirks = Quirks(1 << 0);

    pub const fn empty() -> Self {
        Quirks(0)
    }

    pub fn contains(&self, other: Quirks) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Look up the quirks of a device from its descriptor IDs
    pub fn lookup(vendor_id: u16, product_id: u16, bcd_device: u16) -> Self {
        let mut quirks = Quirks::empty();

        if (vendor_id == VENDOR_OPENMOKO || vendor_id == VENDOR_FIC)
            && (PRODUCT_FREERUNNER_FIRST..=PRODUCT_FREERUNNER_LAST)
                .contains(&product_id)
        {
            quirks |= Quirks::POLL_TIMEOUT;
        }

        if vendor_id == VENDOR_VOTI && product_id == PRODUCT_OPENPCD {
            quirks |= Quirks::POLL_TIMEOUT;
        }

        // old Maple bootloader
        if vendor_id == VENDOR_LEAFLABS
            && product_id == PRODUCT_MAPLE3
            && bcd_device == 0x0200
        {
            quirks |= Quirks::POLL_TIMEOUT;
        }

        if vendor_id == VENDOR_SIEMENS
            && (product_id == PRODUCT_PXM40 || product_id == PRODUCT_PXM50)
            && bcd_device == 0
        {
            quirks |= Quirks::POLL_TIMEOUT;
        }

        if vendor_id == VENDOR_MIDIMAN && product_id == PRODUCT_TRANSIT {
            quirks |= Quirks::POLL_TIMEOUT;
        }

        quirks
    }
}

impl std::ops::BitOr for Quirks {
    type Output = Quirks;

    fn bitor(self, rhs: Quirks) -> Quirks {
        Quirks(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Quirks {
    fn bitor_assign(&mut self, rhs: Quirks) {
        self.0 |= rhs.0;
    }
}
