use twox_hash::XxHash32;

pub fn calculate_32(data: &[u8]) -> u32 {
    XxHash32::oneshot(0, data)
}
