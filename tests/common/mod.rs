/// Common test utilities and mock infrastructure
///
/// This module provides shared functionality for integration tests including:
/// - A simulated recorder that answers the control protocol
/// - A manual clock and small fixtures
pub mod mock_device;
pub mod test_helpers;
